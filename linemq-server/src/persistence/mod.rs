/// Persistence module
///
/// The entire durable state is one append-only text file, one command per
/// line, fsynced on every append. The line-offset index is rebuilt in memory
/// at open time and never written to disk.
pub mod types;
pub mod wal;

pub use types::{PersistenceError, Result};
pub use wal::CommandLog;
