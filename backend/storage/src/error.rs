use docpipe_core::PipelineError;
use thiserror::Error;

/// Errors emitted by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {container}/{name}")]
    NotFound { container: String, name: String },

    #[error("invalid blob name: {0}")]
    InvalidName(String),

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Transport(e.to_string())
    }
}

impl From<StorageError> for PipelineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidName(_) => PipelineError::Validation(e.to_string()),
            StorageError::InvalidConnectionString(_) => PipelineError::Config(e.to_string()),
            other => PipelineError::Storage(other.to_string()),
        }
    }
}

/// Reject names that could escape a container or collide with temp files.
pub fn validate_blob_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.chars().any(char::is_control)
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}
