use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::{Mutex, MutexGuard};

use crate::storage::error::{QueuePersistenceError, Result};
use crate::storage::mutation::QueuedMutation;
use crate::storage::MutationStore;

struct QueueIndex {
    next_seq: u64,
    by_id: HashMap<String, u64>,
}

/// Persistent mutation queue backed by a dedicated Sled tree.
///
/// Keys are a monotonically increasing sequence number encoded big-endian,
/// so iteration order is insertion order (FIFO). Values are the JSON text of
/// the queued mutation. Every write is flushed before it is acknowledged.
pub struct PersistentMutationQueue {
    tree: sled::Tree,
    index: Mutex<QueueIndex>,
    max_entries: Option<usize>,
}

impl PersistentMutationQueue {
    const META_NEXT_SEQ_KEY: &'static [u8] = b"__next_seq__";

    /// Open or create the queue stored in tree `name` of `db`.
    ///
    /// Entries that no longer decode are logged and purged so a single bad
    /// record cannot block every later drain.
    pub fn open(db: &sled::Db, name: &str, max_entries: Option<usize>) -> Result<Self> {
        let tree = db.open_tree(name)?;

        let mut next_seq: u64 = match tree.get(Self::META_NEXT_SEQ_KEY)? {
            Some(bytes) => decode_seq(&bytes).unwrap_or(0),
            None => 0,
        };

        let mut by_id = HashMap::new();
        let mut corrupt = Vec::new();
        for item in tree.iter() {
            let (key, value) = item?;
            let Some(seq) = decode_seq(&key) else {
                continue;
            };
            next_seq = next_seq.max(seq);
            match serde_json::from_slice::<QueuedMutation>(&value) {
                Ok(entry) => {
                    by_id.insert(entry.id, seq);
                }
                Err(e) => {
                    log::error!("Discarding corrupt entry {seq} in queue '{name}': {e}");
                    corrupt.push(key);
                }
            }
        }
        if !corrupt.is_empty() {
            for key in corrupt {
                tree.remove(key)?;
            }
            tree.flush()?;
        }

        log::debug!("Opened queue '{name}' with {} pending mutations", by_id.len());

        Ok(Self {
            tree,
            index: Mutex::new(QueueIndex { next_seq, by_id }),
            max_entries,
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn decode_seq(bytes: &[u8]) -> Option<u64> {
    if bytes.len() != 8 {
        return None;
    }
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

impl MutationStore for PersistentMutationQueue {
    fn enqueue(&self, mutation: QueuedMutation) -> Result<()> {
        let mut index = self.lock();
        if index.by_id.contains_key(&mutation.id) {
            log::debug!("Mutation {} already queued", mutation.id);
            return Ok(());
        }
        if let Some(max) = self.max_entries {
            if index.by_id.len() >= max {
                return Err(QueuePersistenceError::QueueFull(index.by_id.len()));
            }
        }

        let seq = index.next_seq.wrapping_add(1);
        let bytes = serde_json::to_vec(&mutation)?;

        // Entry and sequence metadata land together or not at all.
        let mut batch = sled::Batch::default();
        batch.insert(seq.to_be_bytes().to_vec(), bytes);
        batch.insert(Self::META_NEXT_SEQ_KEY, seq.to_be_bytes().to_vec());
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        index.next_seq = seq;
        index.by_id.insert(mutation.id, seq);
        Ok(())
    }

    fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    fn peek_all(&self) -> Result<Vec<QueuedMutation>> {
        let _index = self.lock();
        let mut entries = Vec::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            let Some(seq) = decode_seq(&key) else {
                continue;
            };
            let entry = serde_json::from_slice::<QueuedMutation>(&value).map_err(|e| {
                QueuePersistenceError::DecodeError {
                    key: seq.to_string(),
                    reason: e.to_string(),
                }
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut index = self.lock();
        let Some(&seq) = index.by_id.get(id) else {
            return Ok(false);
        };
        self.tree.remove(seq.to_be_bytes())?;
        self.tree.flush()?;
        index.by_id.remove(id);
        Ok(true)
    }

    fn record_attempt(&self, id: &str) -> Result<Option<u32>> {
        let index = self.lock();
        let Some(&seq) = index.by_id.get(id) else {
            return Ok(None);
        };
        let key = seq.to_be_bytes();
        let Some(value) = self.tree.get(key)? else {
            return Ok(None);
        };
        let mut entry = serde_json::from_slice::<QueuedMutation>(&value).map_err(|e| {
            QueuePersistenceError::DecodeError {
                key: seq.to_string(),
                reason: e.to_string(),
            }
        })?;
        entry.attempts = entry.attempts.saturating_add(1);
        self.tree.insert(key, serde_json::to_vec(&entry)?)?;
        self.tree.flush()?;
        Ok(Some(entry.attempts))
    }
}
