use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::storage::error::{QueuePersistenceError, Result};
use crate::storage::mutation::QueuedMutation;
use crate::storage::MutationStore;

/// In-memory mutation queue. Nothing survives the process; used for
/// ephemeral sessions and as a test double for the persistent queue.
pub struct MemoryMutationQueue {
    entries: Mutex<VecDeque<QueuedMutation>>,
    max_entries: Option<usize>,
}

impl MemoryMutationQueue {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedMutation>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryMutationQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MutationStore for MemoryMutationQueue {
    fn enqueue(&self, mutation: QueuedMutation) -> Result<()> {
        let mut entries = self.lock();
        if entries.iter().any(|m| m.id == mutation.id) {
            return Ok(());
        }
        if let Some(max) = self.max_entries {
            if entries.len() >= max {
                return Err(QueuePersistenceError::QueueFull(entries.len()));
            }
        }
        entries.push_back(mutation);
        Ok(())
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn peek_all(&self) -> Result<Vec<QueuedMutation>> {
        Ok(self.lock().iter().cloned().collect())
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut entries = self.lock();
        match entries.iter().position(|m| m.id == id) {
            Some(pos) => {
                entries.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn record_attempt(&self, id: &str) -> Result<Option<u32>> {
        let mut entries = self.lock();
        Ok(entries.iter_mut().find(|m| m.id == id).map(|m| {
            m.attempts = m.attempts.saturating_add(1);
            m.attempts
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mutation::{HttpMethod, HttpRequestSpec, MutationPayload};

    fn http_mutation(id: &str) -> QueuedMutation {
        QueuedMutation::new(
            id.to_string(),
            MutationPayload::GenericHttp(HttpRequestSpec {
                method: HttpMethod::Post,
                url: "/api/notices".to_string(),
                headers: Default::default(),
                body: Some(format!("{{\"title\":\"{id}\"}}")),
            }),
            0,
        )
    }

    #[test]
    fn enqueue_rejects_when_full() {
        let queue = MemoryMutationQueue::new(Some(1));
        queue.enqueue(http_mutation("k1")).unwrap();
        let res = queue.enqueue(http_mutation("k2"));
        assert!(matches!(res, Err(QueuePersistenceError::QueueFull(1))));
    }

    #[test]
    fn remove_from_middle_keeps_order() {
        let queue = MemoryMutationQueue::default();
        for id in ["a", "b", "c"] {
            queue.enqueue(http_mutation(id)).unwrap();
        }
        assert!(queue.remove("b").unwrap());
        let ids: Vec<String> = queue.peek_all().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn record_attempt_increments() {
        let queue = MemoryMutationQueue::default();
        queue.enqueue(http_mutation("a")).unwrap();
        assert_eq!(queue.record_attempt("a").unwrap(), Some(1));
        assert_eq!(queue.record_attempt("a").unwrap(), Some(2));
        assert_eq!(queue.record_attempt("zz").unwrap(), None);
        assert_eq!(queue.peek_all().unwrap()[0].attempts, 2);
    }
}
