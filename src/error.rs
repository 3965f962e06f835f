use std::path::PathBuf;
use thiserror::Error;

pub type SamResult<T> = Result<T, SamError>;

// Errors raised while configuring or running the pesticide calculator
#[derive(Error, Debug)]
pub enum SamError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    // Fatal, raised before any simulation starts
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("missing {kind} '{id}'")]
    MissingInput { kind: &'static str, id: String },

    #[error("size mismatch for {name}: expected {expected}, got {actual}")]
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

impl SamError {
    pub fn config(message: impl Into<String>) -> Self {
        SamError::Config(message.into())
    }

    pub fn missing(kind: &'static str, id: impl ToString) -> Self {
        SamError::MissingInput {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SamError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the batch can skip the offending item and carry on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SamError::Config(_))
    }
}
