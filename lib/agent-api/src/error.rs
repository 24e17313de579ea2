use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid message body: {0}")]
    InvalidBody(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
