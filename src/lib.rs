pub mod client;
pub mod cluster;
pub mod config;
pub mod dump;
pub mod error;
pub mod jobs;
pub mod raft;
pub mod repl;
pub mod transport;
pub mod worker;
