pub mod error;
pub mod memory_queue;
pub mod mutation;
pub mod offline_queue;

use std::path::Path;
use std::sync::Arc;

use crate::config::StorageConfig;

pub use self::error::QueuePersistenceError;
pub use self::memory_queue::MemoryMutationQueue;
pub use self::mutation::{
    DocumentOp, DocumentOpKind, HttpMethod, HttpRequestSpec, MutationKind, MutationPayload,
    QueuedMutation,
};
pub use self::offline_queue::PersistentMutationQueue;

pub const GENERIC_QUEUE_TREE: &str = "queue:generic:v1";
pub const DOCUMENT_QUEUE_TREE: &str = "queue:document:v1";

/// Ordered store of pending mutations.
///
/// `enqueue` and `remove` only return once the change is durable for the
/// backing store; `len` must be O(1) since it feeds the pending badge.
pub trait MutationStore: Send + Sync {
    fn enqueue(&self, mutation: QueuedMutation) -> Result<(), QueuePersistenceError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-destructive FIFO snapshot of every pending mutation.
    fn peek_all(&self) -> Result<Vec<QueuedMutation>, QueuePersistenceError>;

    /// Remove a mutation after confirmed replay or explicit discard.
    /// Returns false when no entry has that id.
    fn remove(&self, id: &str) -> Result<bool, QueuePersistenceError>;

    /// Persist one more failed attempt and return the new count.
    fn record_attempt(&self, id: &str) -> Result<Option<u32>, QueuePersistenceError>;
}

/// The generic and document queues, opened from the same storage backend.
pub struct QueueSet {
    pub generic: Arc<dyn MutationStore>,
    pub document: Arc<dyn MutationStore>,
}

pub fn open_queues(
    config: &StorageConfig,
    max_entries: Option<usize>,
) -> Result<QueueSet, QueuePersistenceError> {
    match config {
        StorageConfig::Sled { data_dir } => {
            let path = Path::new(data_dir);
            if !path.exists() {
                std::fs::create_dir_all(path)?;
            }
            let db = sled::open(path)?;
            let generic = PersistentMutationQueue::open(&db, GENERIC_QUEUE_TREE, max_entries)?;
            let document = PersistentMutationQueue::open(&db, DOCUMENT_QUEUE_TREE, max_entries)?;
            Ok(QueueSet {
                generic: Arc::new(generic),
                document: Arc::new(document),
            })
        }
        StorageConfig::Memory => Ok(QueueSet {
            generic: Arc::new(MemoryMutationQueue::new(max_entries)),
            document: Arc::new(MemoryMutationQueue::new(max_entries)),
        }),
    }
}
