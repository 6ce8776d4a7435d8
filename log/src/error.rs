use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("block {index} does not exist in log {actor}")]
    NotFound { actor: String, index: u64 },
    #[error("log {actor} is not writable")]
    NotWritable { actor: String },
    #[error("sled storage error: {0}")]
    Storage(#[from] sled::Error),
}
