use thiserror::Error;

/// State errors for queue operations
///
/// These are well-formed commands that violate a state precondition. They map
/// to `ERROR:` response lines on the wire and are never logged and never
/// fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("queue already exists: {0}")]
    QueueExists(String),

    #[error("queue does not exist: {0}")]
    QueueNotFound(String),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
