use thiserror::Error;

/// Failure to read or write the durable mutation queue.
///
/// Callers must surface this: a mutation whose enqueue failed was not
/// recorded and will not be replayed.
#[derive(Error, Debug)]
pub enum QueuePersistenceError {
    #[error("Sled error: {0}")]
    SledError(String),

    #[error("Encode error: {0}")]
    EncodeError(#[from] serde_json::Error),

    #[error("Corrupt queue entry at key {key}: {reason}")]
    DecodeError { key: String, reason: String },

    #[error("Queue full: {0} pending mutations")]
    QueueFull(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for QueuePersistenceError {
    fn from(err: sled::Error) -> Self {
        QueuePersistenceError::SledError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueuePersistenceError>;
