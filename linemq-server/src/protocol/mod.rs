//! Line-oriented command protocol.
//!
//! One UTF-8 command per line in, one response line out. The verbatim
//! response strings below are the wire contract; the same command lines are
//! also what gets persisted to the log and streamed to replicas.

use std::fmt;
use thiserror::Error;

/// The four broker verbs. Verb matching is case-insensitive; the PUBLISH
/// payload is everything after the second space and may contain spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create { queue: String },
    Drop { queue: String },
    Publish { queue: String, message: String },
    Consume { queue: String },
}

/// Malformed or unknown input. Never touches state or the log.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid command format")]
    InvalidFormat,

    #[error("publish requires a message")]
    MissingMessage,

    #[error("unknown command")]
    UnknownVerb,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let mut parts = line.splitn(3, ' ');
        let verb = parts.next().unwrap_or("");
        let queue = match parts.next() {
            Some(q) if !q.is_empty() => q.to_string(),
            _ => return Err(ParseError::InvalidFormat),
        };
        let rest = parts.next();

        match verb.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Command::Create { queue }),
            "DROP" => Ok(Command::Drop { queue }),
            "CONSUME" => Ok(Command::Consume { queue }),
            "PUBLISH" => match rest {
                Some(message) if !message.is_empty() => Ok(Command::Publish {
                    queue,
                    message: message.to_string(),
                }),
                _ => Err(ParseError::MissingMessage),
            },
            "" => Err(ParseError::InvalidFormat),
            _ => Err(ParseError::UnknownVerb),
        }
    }
}

/// One response line per command, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    QueueCreated,
    QueueDeleted,
    Published,
    Message(String),
    NoMessage,
    QueueExists,
    QueueMissing,
    InvalidFormat,
    MissingMessage,
    UnknownCommand,
}

impl From<ParseError> for Response {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::InvalidFormat => Response::InvalidFormat,
            ParseError::MissingMessage => Response::MissingMessage,
            ParseError::UnknownVerb => Response::UnknownCommand,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::QueueCreated => write!(f, "OK: queue created"),
            Response::QueueDeleted => write!(f, "OK: queue deleted"),
            Response::Published => write!(f, "OK: message published"),
            Response::Message(payload) => write!(f, "MESSAGE: {}", payload),
            Response::NoMessage => write!(f, "NO_MESSAGE"),
            Response::QueueExists => write!(f, "ERROR: queue already exists"),
            Response::QueueMissing => write!(f, "ERROR: queue does not exist"),
            Response::InvalidFormat => write!(f, "ERROR: invalid command format"),
            Response::MissingMessage => write!(f, "ERROR: publish requires a message"),
            Response::UnknownCommand => write!(f, "ERROR: unknown command"),
        }
    }
}
