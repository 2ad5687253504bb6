use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::common::timestamp::now_ms;
use crate::network::connectivity::ConnectivityState;
use crate::network::error::ReplayError;
use crate::network::metrics;
use crate::network::replay::ReplayTarget;
use crate::network::sync_status::{SharedSyncStatus, SyncStatusState};
use crate::storage::mutation::{MutationKind, QueuedMutation};
use crate::storage::MutationStore;

/// Notifications produced while draining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A mutation reached the backend; lists showing `resource` are stale.
    Applied {
        kind: MutationKind,
        id: String,
        resource: String,
    },
    /// A mutation was rejected for good and dropped. The user's change was
    /// not saved.
    LostWrite {
        kind: MutationKind,
        id: String,
        resource: String,
        reason: String,
    },
    /// A drain stopped on a transient failure with entries still queued.
    DrainStopped {
        kind: MutationKind,
        pending: usize,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

const IDLE: u8 = 0;
const DRAINING: u8 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub discarded: usize,
    pub remaining: usize,
    /// Id of the entry a transient failure stopped on.
    pub stopped_at: Option<String>,
    /// Suggested delay before the next drain, set when the drain stopped.
    pub retry_after: Option<Duration>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain of the same queue was in flight; nothing was done.
    Skipped,
    /// The monitor reports the backend unreachable; queue left untouched.
    Offline,
    Completed(DrainReport),
}

impl DrainOutcome {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            DrainOutcome::Completed(report) => report.retry_after,
            _ => None,
        }
    }
}

/// Exponential backoff, `base * 2^attempts` capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1_000), Duration::from_millis(15_000))
    }
}

/// Resets the drainer to `Idle` however the drain ends: normal return,
/// early return, panic or the future being dropped mid-replay.
struct DrainGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.state.store(IDLE, Ordering::Release);
    }
}

enum Step {
    Next,
    Stop,
}

/// Replays one mutation queue against its target, one drain at a time.
pub struct QueueDrainer<T> {
    kind: MutationKind,
    queue: Arc<dyn MutationStore>,
    target: T,
    state: AtomicU8,
    events: broadcast::Sender<SyncEvent>,
    status: SharedSyncStatus,
    backoff: Backoff,
    max_attempts: Option<u32>,
    connectivity: Option<watch::Receiver<ConnectivityState>>,
}

impl<T: ReplayTarget> QueueDrainer<T> {
    pub fn new(
        kind: MutationKind,
        queue: Arc<dyn MutationStore>,
        target: T,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            kind,
            queue,
            target,
            state: AtomicU8::new(IDLE),
            events,
            status: SharedSyncStatus::default(),
            backoff: Backoff::default(),
            max_attempts: None,
            connectivity: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Skip drains (as `DrainOutcome::Offline`) while this receiver reports
    /// the backend unreachable.
    pub fn with_connectivity(mut self, connectivity: watch::Receiver<ConnectivityState>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn queue(&self) -> &Arc<dyn MutationStore> {
        &self.queue
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn state(&self) -> DrainState {
        match self.state.load(Ordering::Acquire) {
            DRAINING => DrainState::Draining,
            _ => DrainState::Idle,
        }
    }

    pub async fn status(&self) -> SyncStatusState {
        self.status.lock().await.clone()
    }

    fn try_begin(&self) -> Option<DrainGuard<'_>> {
        self.state
            .compare_exchange(IDLE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard { state: &self.state })
    }

    /// Drain the queue once, oldest entry first.
    ///
    /// Returns `Skipped` without touching the queue or the network when a
    /// drain is already in progress.
    pub async fn process_once(&self) -> DrainOutcome {
        let Some(_guard) = self.try_begin() else {
            log::debug!("{} drain already in progress; skipping", self.kind);
            return DrainOutcome::Skipped;
        };

        if let Some(connectivity) = &self.connectivity {
            if !connectivity.borrow().online {
                log::debug!("{} drain skipped: offline", self.kind);
                return DrainOutcome::Offline;
            }
        }

        let mut report = DrainReport::default();
        let entries = match self.queue.peek_all() {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("{} queue could not be read: {e}", self.kind);
                report.last_error = Some(e.to_string());
                report.remaining = self.queue.len();
                self.update_status(&report).await;
                return DrainOutcome::Completed(report);
            }
        };

        if !entries.is_empty() {
            log::info!("Draining {} {} mutations", entries.len(), self.kind);
        }

        for entry in entries {
            let step = match self.target.replay(&entry).await {
                Ok(()) => self.on_applied(&entry, &mut report),
                Err(ReplayError::Transient(reason)) => {
                    self.on_transient(&entry, reason, &mut report)
                }
                Err(ReplayError::Permanent(reason)) => {
                    self.on_lost(&entry, reason, &mut report)
                }
            };
            if let Step::Stop = step {
                break;
            }
        }

        report.remaining = self.queue.len();
        self.update_status(&report).await;

        if report.applied > 0 || report.discarded > 0 {
            log::info!(
                "{} drain finished (applied={}, discarded={}, remaining={})",
                self.kind,
                report.applied,
                report.discarded,
                report.remaining
            );
        }
        DrainOutcome::Completed(report)
    }

    fn on_applied(&self, entry: &QueuedMutation, report: &mut DrainReport) -> Step {
        if let Err(e) = self.queue.remove(&entry.id) {
            // The backend has it but the queue still does too. Stop here so
            // this drain does not run ahead of what is recorded; the next
            // drain re-delivers it and relies on the dedupe key.
            log::error!("Applied {} but could not remove it from the queue: {e}", entry.id);
            report.last_error = Some(e.to_string());
            report.stopped_at = Some(entry.id.clone());
            report.retry_after = Some(self.backoff.delay(entry.attempts));
            return Step::Stop;
        }

        metrics::record_applied();
        report.applied += 1;
        let _ = self.events.send(SyncEvent::Applied {
            kind: self.kind,
            id: entry.id.clone(),
            resource: entry.payload.resource(),
        });
        Step::Next
    }

    fn on_transient(&self, entry: &QueuedMutation, reason: String, report: &mut DrainReport) -> Step {
        metrics::record_transient();
        let attempts = match self.queue.record_attempt(&entry.id) {
            Ok(Some(n)) => n,
            Ok(None) => entry.attempts.saturating_add(1),
            Err(e) => {
                log::warn!("Could not persist attempt count for {}: {e}", entry.id);
                entry.attempts.saturating_add(1)
            }
        };

        if let Some(max) = self.max_attempts {
            if attempts >= max {
                let reason = format!("gave up after {attempts} attempts: {reason}");
                return self.on_lost(entry, reason, report);
            }
        }

        log::warn!(
            "Replay of {} {} failed (attempt {attempts}): {reason}; keeping it queued",
            self.kind,
            entry.id
        );
        report.stopped_at = Some(entry.id.clone());
        report.retry_after = Some(self.backoff.delay(attempts));
        report.last_error = Some(reason.clone());
        let _ = self.events.send(SyncEvent::DrainStopped {
            kind: self.kind,
            pending: self.queue.len(),
            reason,
        });
        Step::Stop
    }

    fn on_lost(&self, entry: &QueuedMutation, reason: String, report: &mut DrainReport) -> Step {
        if let Err(e) = self.queue.remove(&entry.id) {
            log::error!("Could not discard rejected mutation {}: {e}", entry.id);
            report.last_error = Some(e.to_string());
            report.stopped_at = Some(entry.id.clone());
            return Step::Stop;
        }

        metrics::record_lost_write();
        log::error!(
            "Discarding {} {}: {reason}; the change could not be saved",
            self.kind,
            entry.id
        );
        report.discarded += 1;
        report.last_error = Some(reason.clone());
        let _ = self.events.send(SyncEvent::LostWrite {
            kind: self.kind,
            id: entry.id.clone(),
            resource: entry.payload.resource(),
            reason,
        });
        Step::Next
    }

    async fn update_status(&self, report: &DrainReport) {
        let mut status = self.status.lock().await;
        status.pending = report.remaining as u64;
        status.last_drain_applied = report.applied as u64;
        status.last_drain_ts_ms = now_ms();
        status.lost_writes += report.discarded as u64;
        status.last_error = report.last_error.clone();
    }
}
