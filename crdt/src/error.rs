use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("invalid change: {0}")]
    Invalid(String),
}
