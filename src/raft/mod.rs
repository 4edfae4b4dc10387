pub mod log;
pub mod replica;
pub mod rpc;
pub mod state;
pub mod timer;

pub use log::{EntryKind, Log, LogEntry};
pub use replica::{ReplicaSnapshot, SchedulerReplica};
pub use state::{RaftRole, ReplicaState};
