use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};

use crate::banner::BannerState;
use crate::common::id::new_mutation_id;
use crate::common::timestamp::Clock;
use crate::config::Config;
use crate::network::connectivity::{
    ConnectivityMonitor, ConnectivityState, NetworkHintSender, Subscription,
};
use crate::network::drainer::{Backoff, DrainOutcome, QueueDrainer, SyncEvent};
use crate::network::metrics;
use crate::network::replay::{DocumentReplayer, HttpReplayer, ReplayTarget};
use crate::network::sync_status::SyncStatusState;
use crate::network::HttpClient;
use crate::storage::error::QueuePersistenceError;
use crate::storage::mutation::{
    DocumentOp, DocumentOpKind, HttpRequestSpec, MutationKind, MutationPayload, QueuedMutation,
};
use crate::storage::{open_queues, MutationStore, QueueSet};

const EVENT_CAPACITY: usize = 256;

/// Point-in-time view of both queues and the connectivity state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub connectivity: ConnectivityState,
    pub pending_generic: usize,
    pub pending_document: usize,
    pub generic: SyncStatusState,
    pub document: SyncStatusState,
}

/// The offline write path of the client: connectivity monitor, the generic
/// and document queues, and one drainer per queue.
///
/// One instance is created at startup and shared (`Arc`) with whatever needs
/// to enqueue or trigger a sync. The sled database behind the queues is the
/// only state that outlives it.
pub struct OfflineSync<H = HttpReplayer, D = DocumentReplayer> {
    clock: Clock,
    monitor: Arc<ConnectivityMonitor>,
    generic: QueueDrainer<H>,
    document: QueueDrainer<D>,
    events: broadcast::Sender<SyncEvent>,
}

impl OfflineSync {
    /// Open the configured queues and build the HTTP and document replayers.
    pub fn open(config: &Config) -> Result<Self, QueuePersistenceError> {
        let queues = open_queues(&config.storage, config.max_entries)?;
        let monitor = Arc::new(ConnectivityMonitor::new(
            config.health_url(),
            config.probe_timeout(),
            config.probe_interval(),
        ));

        let client = HttpClient::new(config.request_timeout());
        let mut http = HttpReplayer::new(client.clone(), config.api_base.clone());
        let mut documents = DocumentReplayer::new(client, config.document.clone());
        if let Some(token) = &config.auth_token {
            http = http.with_auth_token(token.clone());
            documents = documents.with_auth_token(token.clone());
        }

        Self::from_parts(config, queues, monitor, http, documents)
    }
}

impl<H: ReplayTarget, D: ReplayTarget> OfflineSync<H, D> {
    pub fn from_parts(
        config: &Config,
        queues: QueueSet,
        monitor: Arc<ConnectivityMonitor>,
        http: H,
        documents: D,
    ) -> Result<Self, QueuePersistenceError> {
        let clock = Clock::new();
        for queue in [&queues.generic, &queues.document] {
            for entry in queue.peek_all()? {
                clock.observe(entry.enqueued_at_ms);
            }
        }

        let backoff = Backoff::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let generic = QueueDrainer::new(
            MutationKind::GenericHttp,
            queues.generic,
            http,
            events.clone(),
        )
        .with_backoff(backoff)
        .with_max_attempts(config.max_attempts)
        .with_connectivity(monitor.watch());

        let document = QueueDrainer::new(
            MutationKind::BackendDocumentOp,
            queues.document,
            documents,
            events.clone(),
        )
        .with_backoff(backoff)
        .with_max_attempts(config.max_attempts)
        .with_connectivity(monitor.watch());

        let pending = generic.queue().len() + document.queue().len();
        if pending > 0 {
            log::info!("Restored {pending} pending mutations from a previous session");
        }

        Ok(Self {
            clock,
            monitor,
            generic,
            document,
            events,
        })
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Queue an HTTP request for replay. Returns the mutation id.
    pub fn queue_request(&self, request: HttpRequestSpec) -> Result<String, QueuePersistenceError> {
        let ts = self.clock.now();
        let id = new_mutation_id(ts);
        self.enqueue(
            self.generic.queue(),
            QueuedMutation::new(id.clone(), MutationPayload::GenericHttp(request), ts),
        )?;
        Ok(id)
    }

    /// Queue a document operation for replay. A create without a document
    /// id gets the mutation id, so later queued updates can address it.
    pub fn queue_document_op(&self, mut op: DocumentOp) -> Result<String, QueuePersistenceError> {
        let ts = self.clock.now();
        let id = new_mutation_id(ts);
        if op.op == DocumentOpKind::Create && op.doc_id.is_none() {
            op.doc_id = Some(id.clone());
        }
        self.enqueue(
            self.document.queue(),
            QueuedMutation::new(id.clone(), MutationPayload::BackendDocumentOp(op), ts),
        )?;
        Ok(id)
    }

    fn enqueue(
        &self,
        queue: &Arc<dyn MutationStore>,
        mutation: QueuedMutation,
    ) -> Result<(), QueuePersistenceError> {
        let id = mutation.id.clone();
        let kind = mutation.kind();
        match queue.enqueue(mutation) {
            Ok(()) => {
                metrics::record_enqueued();
                log::info!("Queued {kind} mutation {id} ({} pending)", self.queue_length());
                Ok(())
            }
            Err(e) => {
                log::warn!("Could not queue {kind} mutation {id}; the change may be lost: {e}");
                Err(e)
            }
        }
    }

    /// Pending mutations across both queues.
    pub fn queue_length(&self) -> usize {
        self.generic.queue().len() + self.document.queue().len()
    }

    /// Every pending mutation, oldest first.
    pub fn pending(&self) -> Result<Vec<QueuedMutation>, QueuePersistenceError> {
        let mut all = self.generic.queue().peek_all()?;
        all.extend(self.document.queue().peek_all()?);
        all.sort_by_key(|m| m.enqueued_at_ms);
        Ok(all)
    }

    /// Drop a pending mutation without replaying it.
    pub fn discard(&self, id: &str) -> Result<bool, QueuePersistenceError> {
        if self.generic.queue().remove(id)? {
            log::info!("Discarded generic-http mutation {id}");
            return Ok(true);
        }
        if self.document.queue().remove(id)? {
            log::info!("Discarded backend-document-op mutation {id}");
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn check_online(&self) -> bool {
        self.monitor.check_online().await
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    pub fn on_network_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.monitor.on_network_change(handler)
    }

    pub fn hint_sender(&self) -> NetworkHintSender {
        self.monitor.hint_sender()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn process_queue_once(&self) -> DrainOutcome {
        self.generic.process_once().await
    }

    pub async fn process_document_queue_once(&self) -> DrainOutcome {
        self.document.process_once().await
    }

    /// Drain both queues. They target separate backends, so they run side
    /// by side; each stays sequential internally.
    pub async fn sync_now(&self) -> (DrainOutcome, DrainOutcome) {
        tokio::join!(self.generic.process_once(), self.document.process_once())
    }

    pub fn banner(&self) -> BannerState {
        BannerState::from_state(self.is_online(), self.queue_length())
    }

    pub async fn status(&self) -> SyncSnapshot {
        SyncSnapshot {
            connectivity: self.monitor.state(),
            pending_generic: self.generic.queue().len(),
            pending_document: self.document.queue().len(),
            generic: self.generic.status().await,
            document: self.document.status().await,
        }
    }

    async fn drain_and_schedule(&self) -> Option<Instant> {
        let (generic, document) = self.sync_now().await;
        [generic.retry_after(), document.retry_after()]
            .into_iter()
            .flatten()
            .min()
            .map(|delay| Instant::now() + delay)
    }

    /// Run the connectivity monitor and drain automatically: on every
    /// offline to online transition, after each probe while entries are
    /// waiting, and when a backoff deadline from a stopped drain elapses.
    pub async fn run(self: Arc<Self>)
    where
        H: 'static,
        D: 'static,
    {
        let monitor_task = tokio::spawn(Arc::clone(&self.monitor).run());
        let mut connectivity = self.monitor.watch();
        let mut was_online = connectivity.borrow().online;
        let mut retry_at: Option<Instant> = None;

        loop {
            let deadline = retry_at;
            let retry = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = connectivity.borrow_and_update().online;
                    let came_online = online && !was_online;
                    was_online = online;

                    let waiting = retry_at.is_none() && self.queue_length() > 0;
                    if came_online || (online && waiting) {
                        retry_at = self.drain_and_schedule().await;
                    }
                }
                _ = retry => {
                    retry_at = if self.is_online() {
                        self.drain_and_schedule().await
                    } else {
                        None
                    };
                }
            }
        }

        monitor_task.abort();
    }
}

/// Log every sync event until the sender side closes. A receiver that falls
/// behind skips the overwritten events and keeps going. Returns the number
/// of events logged.
pub async fn log_events(mut events: broadcast::Receiver<SyncEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                match event {
                    SyncEvent::Applied { kind, id, resource } => {
                        log::info!("Replayed {kind} mutation {id} on {resource}");
                    }
                    SyncEvent::LostWrite {
                        kind,
                        id,
                        resource,
                        reason,
                    } => {
                        log::error!("Lost {kind} write {id} on {resource}: {reason}");
                    }
                    SyncEvent::DrainStopped {
                        kind,
                        pending,
                        reason,
                    } => {
                        log::warn!("{kind} drain paused with {pending} pending: {reason}");
                    }
                }
                logged += 1;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Event log fell behind; {skipped} sync events were not logged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    logged
}
