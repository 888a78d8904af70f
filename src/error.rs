use thiserror::Error;

#[derive(Error, Debug)]
pub enum BallotError {
    #[error("cluster name cannot be empty")]
    ClusterName,

    #[error("cluster size must be at least 1")]
    ClusterSize,

    #[error("a state-change handler is required")]
    HandlerRequired,

    #[error("a transport is required")]
    TransportRequired,

    #[error("a log or log path is required")]
    LogRequired,

    #[error("log holds no state")]
    LogNoState,

    #[error("log integrity check failed")]
    LogCorrupt,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BallotError>;
