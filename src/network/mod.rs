pub mod client;
pub mod connectivity;
pub mod drainer;
pub mod error;
pub mod http_admin;
pub mod metrics;
pub mod replay;
pub mod sync_status;

pub use client::{HttpClient, HttpResponse};
pub use connectivity::{
    ConnectivityMonitor, ConnectivityState, NetworkHint, NetworkHintSender, Subscription,
};
pub use drainer::{Backoff, DrainOutcome, DrainReport, DrainState, QueueDrainer, SyncEvent};
pub use error::{HttpError, ProbeFailure, ReplayError};
pub use http_admin::run_http_admin;
pub use replay::{DocumentReplayer, HttpReplayer, ReplayTarget};
pub use sync_status::{SharedSyncStatus, SyncStatusState};
