use super::queue::QueueStore;
use crate::persistence::{CommandLog, Result};
use crate::protocol::{Command, Response};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Parses and applies client commands against the queue store, keeping the
/// persisted log consistent with in-memory state.
///
/// A command is appended to the log, verbatim, if and only if applying it
/// actually mutated state (PUBLISH once applied; CONSUME only when a message
/// came off; CREATE and DROP only on success) and the caller asked for
/// logging. Replay and the replica apply path pass `should_log = false`
/// because those lines are already durable elsewhere. The append happens
/// while the mutated queue's locks are still held, so log order always
/// matches application order.
pub struct CommandEngine {
    store: QueueStore,
    log: Arc<CommandLog>,
}

impl CommandEngine {
    /// Open the log at `path`, replay it into an empty store, and return the
    /// ready engine.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let log = Arc::new(CommandLog::open(path).await?);
        let engine = Self {
            store: QueueStore::new(),
            log,
        };
        engine.replay().await?;
        Ok(engine)
    }

    /// Apply one command line and produce its response line.
    ///
    /// Protocol and state errors are plain responses. An `Err` here is a log
    /// I/O failure: the mutation may have been applied in memory without
    /// becoming durable, so the caller must not acknowledge the command.
    pub async fn apply(&self, line: &str, should_log: bool) -> Result<Response> {
        let line = line.trim();
        let command = match Command::parse(line) {
            Ok(cmd) => cmd,
            Err(err) => return Ok(Response::from(err)),
        };

        match command {
            Command::Create { queue } => match self.store.create(&queue).await {
                Ok(guard) => {
                    self.log_if(should_log, line).await?;
                    drop(guard);
                    Ok(Response::QueueCreated)
                }
                Err(_) => Ok(Response::QueueExists),
            },
            Command::Drop { queue } => match self.store.remove(&queue).await {
                Ok(guard) => {
                    self.log_if(should_log, line).await?;
                    drop(guard);
                    Ok(Response::QueueDeleted)
                }
                Err(_) => Ok(Response::QueueMissing),
            },
            Command::Publish { queue, message } => {
                let (mut guard, _created) = self.store.queue_or_create(&queue).await;
                guard.push_back(message);
                self.log_if(should_log, line).await?;
                drop(guard);
                Ok(Response::Published)
            }
            Command::Consume { queue } => match self.store.queue(&queue).await {
                None => Ok(Response::QueueMissing),
                Some(mut guard) => match guard.pop_front() {
                    None => Ok(Response::NoMessage),
                    Some(message) => {
                        self.log_if(should_log, line).await?;
                        drop(guard);
                        Ok(Response::Message(message))
                    }
                },
            },
        }
    }

    async fn log_if(&self, should_log: bool, line: &str) -> Result<()> {
        if !should_log {
            return Ok(());
        }
        match self.log.append(line).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // Memory is now ahead of the log; surface loudly and let the
                // caller refuse to acknowledge.
                error!(error = %e, command = line, "log append failed");
                Err(e)
            }
        }
    }

    /// Replay every log record in order against the (empty) store. Records
    /// are applied with logging disabled so replay never duplicates them.
    pub async fn replay(&self) -> Result<()> {
        let records = self.log.read_all().await?;
        let total = records.len();
        for record in records {
            let response = self.apply(&record, false).await?;
            debug!(command = %record, response = %response, "replayed log record");
        }
        info!(records = total, "log replay complete");
        Ok(())
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn log(&self) -> &Arc<CommandLog> {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_engine() -> (tempfile::TempDir, CommandEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = CommandEngine::open(dir.path().join("commands.log"))
            .await
            .unwrap();
        (dir, engine)
    }

    async fn apply(engine: &CommandEngine, line: &str) -> String {
        engine.apply(line, true).await.unwrap().to_string()
    }

    #[tokio::test]
    async fn test_full_command_scenario() {
        let (_dir, engine) = temp_engine().await;

        assert_eq!(apply(&engine, "CREATE a").await, "OK: queue created");
        assert_eq!(
            apply(&engine, "PUBLISH a hello world").await,
            "OK: message published"
        );
        assert_eq!(apply(&engine, "CONSUME a").await, "MESSAGE: hello world");
        assert_eq!(apply(&engine, "CONSUME a").await, "NO_MESSAGE");
        assert_eq!(apply(&engine, "DROP a").await, "OK: queue deleted");
        assert_eq!(
            apply(&engine, "CONSUME a").await,
            "ERROR: queue does not exist"
        );
    }

    #[tokio::test]
    async fn test_publish_auto_creates() {
        let (_dir, engine) = temp_engine().await;

        assert_eq!(
            apply(&engine, "PUBLISH fresh payload").await,
            "OK: message published"
        );
        assert_eq!(apply(&engine, "CONSUME fresh").await, "MESSAGE: payload");
    }

    #[tokio::test]
    async fn test_duplicate_create_leaves_contents_untouched() {
        let (_dir, engine) = temp_engine().await;

        apply(&engine, "CREATE a").await;
        apply(&engine, "PUBLISH a kept").await;
        assert_eq!(
            apply(&engine, "CREATE a").await,
            "ERROR: queue already exists"
        );
        assert_eq!(apply(&engine, "CONSUME a").await, "MESSAGE: kept");
    }

    #[tokio::test]
    async fn test_only_mutations_are_logged() {
        let (_dir, engine) = temp_engine().await;

        apply(&engine, "CREATE a").await; // logged
        apply(&engine, "CREATE a").await; // AlreadyExists: not logged
        apply(&engine, "CONSUME a").await; // NO_MESSAGE: not logged
        apply(&engine, "CONSUME ghost").await; // NotFound: not logged
        apply(&engine, "DROP ghost").await; // NotFound: not logged
        apply(&engine, "PUBLISH a msg").await; // logged
        apply(&engine, "CONSUME a").await; // removed a message: logged
        apply(&engine, "garbage").await; // protocol error: not logged
        apply(&engine, "PUBLISH a").await; // missing payload: not logged

        assert_eq!(
            engine.log().read_all().await.unwrap(),
            vec![
                "CREATE a".to_string(),
                "PUBLISH a msg".to_string(),
                "CONSUME a".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_should_log_false_keeps_log_untouched() {
        let (_dir, engine) = temp_engine().await;

        engine.apply("CREATE a", false).await.unwrap();
        engine.apply("PUBLISH a msg", false).await.unwrap();

        assert_eq!(engine.log().count(), 0);
        assert_eq!(engine.store().depth("a").await, Some(1));
    }

    #[tokio::test]
    async fn test_replay_reproduces_live_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.log");

        let live = CommandEngine::open(&path).await.unwrap();
        for line in [
            "CREATE a",
            "PUBLISH a one",
            "PUBLISH b auto created",
            "PUBLISH a two",
            "CONSUME a",
            "CREATE doomed",
            "PUBLISH doomed gone",
            "DROP doomed",
        ] {
            live.apply(line, true).await.unwrap();
        }
        let live_state = live.store().snapshot().await;
        let log_count = live.log().count();
        drop(live);

        let replayed = CommandEngine::open(&path).await.unwrap();
        assert_eq!(replayed.store().snapshot().await, live_state);
        // Replay must not duplicate records.
        assert_eq!(replayed.log().count(), log_count);
    }

    #[tokio::test]
    async fn test_consume_preserves_fifo_across_interleaving() {
        let (_dir, engine) = temp_engine().await;

        for i in 0..5 {
            apply(&engine, &format!("PUBLISH a a{}", i)).await;
            apply(&engine, &format!("PUBLISH b b{}", i)).await;
        }
        for i in 0..5 {
            assert_eq!(
                apply(&engine, "CONSUME a").await,
                format!("MESSAGE: a{}", i)
            );
        }
        for i in 0..5 {
            assert_eq!(
                apply(&engine, "CONSUME b").await,
                format!("MESSAGE: b{}", i)
            );
        }
    }

    #[tokio::test]
    async fn test_concurrent_publishes_match_log() {
        let (_dir, engine) = temp_engine().await;
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for i in 0..32 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine
                    .apply(&format!("PUBLISH shared msg{}", i), true)
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), Response::Published);
        }

        assert_eq!(engine.store().depth("shared").await, Some(32));
        assert_eq!(engine.log().count(), 32);
    }
}
