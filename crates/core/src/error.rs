use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AttestError {
    fn from(e: serde_json::Error) -> Self {
        AttestError::Serialize(e.to_string())
    }
}
