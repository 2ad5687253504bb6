pub mod banner;
pub mod common;
pub mod config;
pub mod network;
pub mod service;
pub mod storage;

// Public exports
pub use banner::BannerState;
pub use config::{Config, StorageConfig};
pub use network::{ConnectivityMonitor, DrainOutcome, ReplayError, ReplayTarget, SyncEvent};
pub use service::{OfflineSync, SyncSnapshot};
pub use storage::{DocumentOp, HttpRequestSpec, MutationStore, QueuedMutation};
