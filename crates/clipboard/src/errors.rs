use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard channel error: {0}")]
    Channel(String),

    #[error("association snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("association snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
