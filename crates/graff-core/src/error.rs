use thiserror::Error;

/// Errors raised by the graff workspace.
///
/// Configuration and data-integrity problems fail fast at startup; numerical
/// failures carry the identity of the offending batch so they can be traced
/// back to the data that produced them.
#[derive(Debug, Error)]
pub enum GraffError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Data integrity error for molecule '{molecule}': {reason}")]
    DataIntegrity { molecule: String, reason: String },

    #[error("Non-finite {quantity} in batch [{batch}]")]
    NonFinite { batch: String, quantity: String },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GraffError>;
