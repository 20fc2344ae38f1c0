use super::types::{PersistenceError, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

/// Byte offsets of line boundaries in the log file.
///
/// `bounds[0]` is always 0; `bounds[i]` is the offset just past record `i`
/// (including its newline, or EOF for an unterminated final record). The
/// record count is therefore `bounds.len() - 1`.
struct LineOffsetIndex {
    bounds: Vec<u64>,
}

impl LineOffsetIndex {
    fn scan(data: &[u8]) -> Self {
        let mut bounds = vec![0u64];
        for (pos, b) in data.iter().enumerate() {
            if *b == b'\n' {
                bounds.push(pos as u64 + 1);
            }
        }
        // A torn final write leaves a record without its newline; a newline
        // scan still recovers it as the last complete record.
        let len = data.len() as u64;
        if len > *bounds.last().unwrap() {
            bounds.push(len);
        }
        Self { bounds }
    }

    fn count(&self) -> u64 {
        (self.bounds.len() - 1) as u64
    }

    /// Byte range `[start, end)` of the 1-based record `n`, newline included.
    fn range(&self, n: u64) -> Option<(u64, u64)> {
        if n < 1 || n > self.count() {
            return None;
        }
        let i = n as usize;
        Some((self.bounds[i - 1], self.bounds[i]))
    }

    fn push_record(&mut self, byte_len: u64) -> u64 {
        let end = *self.bounds.last().unwrap() + byte_len;
        self.bounds.push(end);
        self.count()
    }

    /// Account for the newline written to terminate a recovered torn record.
    fn seal_last_record(&mut self) {
        *self.bounds.last_mut().unwrap() += 1;
    }
}

/// Append-only, fsync-per-append command log with O(1) random line access.
///
/// One record is one verbatim command line. The offset index is rebuilt by
/// scanning the file at open time and extended in memory on every append;
/// it is never persisted.
pub struct CommandLog {
    path: PathBuf,
    writer: Mutex<File>,
    index: RwLock<LineOffsetIndex>,
    appended: Notify,
}

impl CommandLog {
    /// Open or create the log file and build the line-offset index.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let data = tokio::fs::read(&path).await?;
        let mut index = LineOffsetIndex::scan(&data);

        // A recovered torn record is missing its newline on disk. Restore
        // the terminator before accepting appends, otherwise the next
        // record would fuse with it and a later reopen would read one
        // merged line.
        if data.last().is_some_and(|b| *b != b'\n') {
            writer.write_all(b"\n").await?;
            writer.sync_all().await?;
            index.seal_last_record();
            warn!(path = %path.display(), "restored missing newline after torn final record");
        }

        info!(path = %path.display(), records = index.count(), "command log opened");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            index: RwLock::new(index),
            appended: Notify::new(),
        })
    }

    /// Append one record and force it to stable storage before returning.
    ///
    /// Returns the record's 1-based sequence number. Appends are serialized
    /// by the writer lock, so sequence numbers are gap-free and match call
    /// completion order. `record` must not contain a newline.
    pub async fn append(&self, record: &str) -> Result<u64> {
        debug_assert!(!record.contains('\n'));

        let mut writer = self.writer.lock().await;
        writer.write_all(record.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        writer.sync_all().await?;

        // The index is extended only after the bytes are durable, still under
        // the writer lock so readers never see a sequence number twice.
        let seq = self
            .index
            .write()
            .push_record(record.len() as u64 + 1);
        drop(writer);

        debug!(seq, len = record.len(), "log record appended");
        self.appended.notify_waiters();
        Ok(seq)
    }

    /// Read the exact content of the `n`-th record (1-based), without its
    /// newline, seeking directly via the index. Out-of-range `n` is `None`.
    pub async fn read_line(&self, n: u64) -> Result<Option<String>> {
        let Some((start, end)) = self.index.read().range(n) else {
            return Ok(None);
        };

        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }

        let line = String::from_utf8(buf)
            .map_err(|_| PersistenceError::InvalidRecord { line: n })?;
        Ok(Some(line))
    }

    /// Read every record in order. Used once, for startup replay.
    pub async fn read_all(&self) -> Result<Vec<String>> {
        let data = tokio::fs::read_to_string(&self.path).await?;
        Ok(data.lines().map(str::to_string).collect())
    }

    /// Number of records currently in the log.
    pub fn count(&self) -> u64 {
        self.index.read().count()
    }

    /// Suspend until a record is appended.
    ///
    /// Wakeups can race with appends; callers must re-check `count()` after
    /// waking rather than assume exactly one new record.
    pub async fn wait_for_append(&self) {
        self.appended.notified().await;
    }
}
