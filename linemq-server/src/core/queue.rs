use super::error::{BrokerError, Result};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

type Fifo = VecDeque<String>;
type QueueHandle = Arc<Mutex<Fifo>>;
type QueueMap = HashMap<String, QueueHandle>;

/// Concurrency-safe collection of named FIFO queues.
///
/// Two lock tiers: the map's RwLock is the structure lock, serializing
/// anything that adds or removes a queue's existence (CREATE, DROP and the
/// auto-create path inside PUBLISH); each queue's Mutex serializes access to
/// that queue's contents. Every operation acquires the structure tier first
/// (shared for PUBLISH/CONSUME, exclusive for CREATE/DROP/auto-create) and
/// the queue tier second, so the two tiers can never deadlock.
///
/// Guards returned here keep the structure tier held until dropped. The
/// engine relies on that to append the command to the log inside the same
/// critical section as the mutation, which is what makes replay order match
/// application order.
pub struct QueueStore {
    queues: RwLock<QueueMap>,
}

enum StructureHold<'a> {
    Shared(#[allow(dead_code)] RwLockReadGuard<'a, QueueMap>),
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'a, QueueMap>),
}

/// Exclusive access to one queue's contents.
///
/// Holds the structure tier (shared or exclusive) for its lifetime, so the
/// queue cannot be dropped out from under the holder.
pub struct QueueGuard<'a> {
    _structure: StructureHold<'a>,
    queue: OwnedMutexGuard<Fifo>,
}

impl Deref for QueueGuard<'_> {
    type Target = Fifo;
    fn deref(&self) -> &Fifo {
        &self.queue
    }
}

impl DerefMut for QueueGuard<'_> {
    fn deref_mut(&mut self) -> &mut Fifo {
        &mut self.queue
    }
}

/// Result of a successful CREATE; keeps the structure lock held so the
/// caller can log the command before any competing CREATE/DROP runs.
pub struct CreateGuard<'a> {
    _map: RwLockWriteGuard<'a, QueueMap>,
}

/// Result of a successful DROP. The entry is already removed from the map;
/// both locks stay held until the guard drops.
pub struct RemoveGuard<'a> {
    _map: RwLockWriteGuard<'a, QueueMap>,
    /// Keeps the orphaned queue locked so an in-flight handle cannot
    /// observe a half-dropped queue.
    _queue: OwnedMutexGuard<Fifo>,
    /// Number of undelivered messages discarded by the drop.
    pub discarded: usize,
}

impl QueueStore {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Lock an existing queue for PUBLISH/CONSUME. `None` if it was never
    /// created (or has been dropped).
    pub async fn queue(&self, name: &str) -> Option<QueueGuard<'_>> {
        let map = self.queues.read().await;
        let handle = Arc::clone(map.get(name)?);
        let queue = handle.lock_owned().await;
        Some(QueueGuard {
            _structure: StructureHold::Shared(map),
            queue,
        })
    }

    /// Lock a queue for PUBLISH, creating it if absent. Returns whether the
    /// queue was auto-created.
    pub async fn queue_or_create(&self, name: &str) -> (QueueGuard<'_>, bool) {
        {
            let map = self.queues.read().await;
            if let Some(handle) = map.get(name) {
                let handle = Arc::clone(handle);
                let queue = handle.lock_owned().await;
                return (
                    QueueGuard {
                        _structure: StructureHold::Shared(map),
                        queue,
                    },
                    false,
                );
            }
        }

        // Auto-create under the structure lock; re-check because another
        // publisher may have created the queue while we upgraded.
        let mut map = self.queues.write().await;
        let created = !map.contains_key(name);
        let handle = Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        );
        if created {
            info!(queue = name, "queue auto-created");
        }
        let queue = handle.lock_owned().await;
        (
            QueueGuard {
                _structure: StructureHold::Exclusive(map),
                queue,
            },
            created,
        )
    }

    /// Explicit CREATE. Fails if the name is already present.
    pub async fn create(&self, name: &str) -> Result<CreateGuard<'_>> {
        let mut map = self.queues.write().await;
        if map.contains_key(name) {
            return Err(BrokerError::QueueExists(name.to_string()));
        }
        map.insert(name.to_string(), Arc::new(Mutex::new(VecDeque::new())));
        info!(queue = name, "queue created");
        Ok(CreateGuard { _map: map })
    }

    /// DROP: removes the queue and all undelivered messages, holding both
    /// the structure lock and the target queue's lock.
    pub async fn remove(&self, name: &str) -> Result<RemoveGuard<'_>> {
        let mut map = self.queues.write().await;
        let handle = map
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))?;
        let queue = handle.lock_owned().await;
        map.remove(name);
        let discarded = queue.len();
        info!(queue = name, discarded, "queue dropped");
        Ok(RemoveGuard {
            _map: map,
            _queue: queue,
            discarded,
        })
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.queues.read().await.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pending message count, `None` if the queue does not exist.
    pub async fn depth(&self, name: &str) -> Option<usize> {
        let guard = self.queue(name).await?;
        Some(guard.len())
    }

    /// Snapshot of one queue's pending messages in delivery order.
    pub async fn messages(&self, name: &str) -> Option<Vec<String>> {
        let guard = self.queue(name).await?;
        Some(guard.iter().cloned().collect())
    }

    /// Full snapshot (queue set plus per-queue order), used to compare
    /// replica state against the master.
    pub async fn snapshot(&self) -> Vec<(String, Vec<String>)> {
        let mut out = Vec::new();
        for name in self.names().await {
            if let Some(messages) = self.messages(&name).await {
                out.push((name, messages));
            }
        }
        debug!(queues = out.len(), "queue store snapshot taken");
        out
    }
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}
