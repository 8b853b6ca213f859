use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source error: {0}")]
    SourceError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Muxing error: {0}")]
    MuxingError(String),

    #[error("Audio error: {0}")]
    AudioError(String),

    #[error("Export cancelled")]
    Cancelled,
}

pub type ReelResult<T> = Result<T, ReelError>;
