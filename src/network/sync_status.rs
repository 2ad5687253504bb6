use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory sync status for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatusState {
    /// Mutations still queued after the last drain.
    pub pending: u64,
    /// Mutations applied by the last drain.
    pub last_drain_applied: u64,
    /// Timestamp of the last drain attempt, in milliseconds since UNIX_EPOCH.
    pub last_drain_ts_ms: u64,
    /// Mutations discarded as lost writes since startup.
    pub lost_writes: u64,
    /// Last replay or storage error, if the last drain hit one.
    pub last_error: Option<String>,
}

pub type SharedSyncStatus = Arc<Mutex<SyncStatusState>>;
