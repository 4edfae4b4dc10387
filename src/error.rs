use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown scheduler id {0}")]
    UnknownScheduler(u64),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedError>;
