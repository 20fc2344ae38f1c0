use thiserror::Error;

/// Persistence error types
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log record is not valid UTF-8 at line {line}")]
    InvalidRecord { line: u64 },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
