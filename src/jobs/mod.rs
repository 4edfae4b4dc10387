pub mod job;
pub mod picker;

pub use job::{Job, JobStatus};
pub use picker::{pick_worker, LoadOracle};
