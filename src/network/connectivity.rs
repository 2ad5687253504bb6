use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::common::timestamp::now_ms;
use crate::network::client::HttpClient;
use crate::network::error::ProbeFailure;
use crate::network::metrics;

/// Last confirmed reachability of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectivityState {
    pub online: bool,
    pub last_checked_at_ms: Option<u64>,
}

/// Platform-level network signal. `Offline` is trusted as is; `Online` only
/// asks for a fresh probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkHint {
    Online,
    Offline,
}

pub type NetworkHintSender = mpsc::UnboundedSender<NetworkHint>;

type Handler = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct HandlerRegistry {
    next_id: u64,
    handlers: BTreeMap<u64, Handler>,
}

/// Handle returned by [`ConnectivityMonitor::on_network_change`]. Dropping
/// it unsubscribes the handler.
#[must_use = "dropping the subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<HandlerRegistry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
            registry.handlers.remove(&self.id);
        }
    }
}

#[derive(Deserialize)]
struct HealthBody {
    status: String,
}

pub struct ConnectivityMonitor {
    client: HttpClient,
    health_url: String,
    interval: Duration,
    state: watch::Sender<ConnectivityState>,
    handlers: Arc<Mutex<HandlerRegistry>>,
    hints_tx: NetworkHintSender,
    hints_rx: Mutex<Option<mpsc::UnboundedReceiver<NetworkHint>>>,
}

impl ConnectivityMonitor {
    /// The monitor starts offline; only a successful probe flips it online.
    pub fn new<T: Into<String>>(health_url: T, probe_timeout: Duration, interval: Duration) -> Self {
        let (state, _) = watch::channel(ConnectivityState::default());
        let (hints_tx, hints_rx) = mpsc::unbounded_channel();
        Self {
            client: HttpClient::new(probe_timeout),
            health_url: health_url.into(),
            interval,
            state,
            handlers: Arc::new(Mutex::new(HandlerRegistry::default())),
            hints_tx,
            hints_rx: Mutex::new(Some(hints_rx)),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    pub fn hint_sender(&self) -> NetworkHintSender {
        self.hints_tx.clone()
    }

    /// Call `handler` with the new value on every online/offline transition.
    pub fn on_network_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut registry = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.insert(id, Arc::new(handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.handlers),
        }
    }

    /// Probe the backend and record the result. Returns true only when the
    /// health endpoint confirmed reachability.
    pub async fn check_online(&self) -> bool {
        let online = match Self::check_once(&self.client, &self.health_url).await {
            Ok(()) => true,
            Err(failure) => {
                metrics::record_probe_failure();
                log::debug!("Connectivity probe to {} failed: {failure}", self.health_url);
                false
            }
        };
        self.record(online);
        online
    }

    /// Trust an offline signal without probing.
    pub fn mark_offline(&self) {
        self.record(false);
    }

    /// One probe against `url`: 2xx with a JSON body whose `status` is `"ok"`.
    pub async fn check_once(client: &HttpClient, url: &str) -> Result<(), ProbeFailure> {
        let response = client.get(url).await?;
        if !response.is_success() {
            return Err(ProbeFailure::Status(response.status));
        }
        let body: HealthBody = serde_json::from_slice(&response.body)
            .map_err(|e| ProbeFailure::UnexpectedBody(e.to_string()))?;
        if body.status != "ok" {
            return Err(ProbeFailure::UnexpectedBody(format!("status={}", body.status)));
        }
        Ok(())
    }

    fn record(&self, online: bool) {
        let checked_at = now_ms();
        let mut changed = false;
        self.state.send_modify(|state| {
            changed = state.online != online;
            state.online = online;
            state.last_checked_at_ms = Some(checked_at);
        });

        if changed {
            if online {
                log::info!("Backend reachable, switching to online");
            } else {
                log::warn!("Backend unreachable, switching to offline");
            }
            self.notify(online);
        }
    }

    fn notify(&self, online: bool) {
        let handlers: Vec<Handler> = {
            let registry = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
            registry.handlers.values().cloned().collect()
        };
        for handler in handlers {
            handler(online);
        }
    }

    /// Probe immediately, then on every interval tick and whenever an
    /// `Online` hint arrives. Runs until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let hints = self
            .hints_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut hints) = hints else {
            log::warn!("ConnectivityMonitor::run called twice; ignoring");
            return;
        };

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut hints_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_online().await;
                }
                hint = hints.recv(), if hints_open => match hint {
                    Some(NetworkHint::Offline) => self.mark_offline(),
                    Some(NetworkHint::Online) => {
                        self.check_online().await;
                        ticker.reset();
                    }
                    None => hints_open = false,
                },
            }
        }
    }
}
