use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

pub static MUTATIONS_ENQUEUED_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static REPLAY_APPLIED_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static REPLAY_TRANSIENT_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static LOST_WRITES_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static PROBE_FAILURES_TOTAL: AtomicU64 = AtomicU64::new(0);

pub fn record_enqueued() {
    MUTATIONS_ENQUEUED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_applied() {
    REPLAY_APPLIED_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_transient() {
    REPLAY_TRANSIENT_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_lost_write() {
    LOST_WRITES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_probe_failure() {
    PROBE_FAILURES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub applied: u64,
    pub transient: u64,
    pub lost: u64,
    pub probe_failures: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        enqueued: MUTATIONS_ENQUEUED_TOTAL.load(Ordering::Relaxed),
        applied: REPLAY_APPLIED_TOTAL.load(Ordering::Relaxed),
        transient: REPLAY_TRANSIENT_TOTAL.load(Ordering::Relaxed),
        lost: LOST_WRITES_TOTAL.load(Ordering::Relaxed),
        probe_failures: PROBE_FAILURES_TOTAL.load(Ordering::Relaxed),
    }
}

/// Prometheus text exposition of the counters plus the current gauges.
pub fn render_prometheus(pending_generic: usize, pending_document: usize, online: bool) -> String {
    let s = snapshot();
    let mut out = String::new();

    let counters = [
        ("campus_sync_mutations_enqueued_total", "Mutations accepted into a queue", s.enqueued),
        ("campus_sync_replay_applied_total", "Mutations replayed successfully", s.applied),
        ("campus_sync_replay_transient_failures_total", "Replays that failed transiently", s.transient),
        ("campus_sync_lost_writes_total", "Mutations discarded after a permanent rejection", s.lost),
        ("campus_sync_probe_failures_total", "Connectivity probes that failed", s.probe_failures),
    ];
    for (name, help, value) in counters {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }

    let _ = writeln!(out, "# HELP campus_sync_pending_mutations Mutations waiting for replay");
    let _ = writeln!(out, "# TYPE campus_sync_pending_mutations gauge");
    let _ = writeln!(out, "campus_sync_pending_mutations{{queue=\"generic\"}} {pending_generic}");
    let _ = writeln!(out, "campus_sync_pending_mutations{{queue=\"document\"}} {pending_document}");

    let _ = writeln!(out, "# HELP campus_sync_online Whether the backend is reachable");
    let _ = writeln!(out, "# TYPE campus_sync_online gauge");
    let _ = writeln!(out, "campus_sync_online {}", u8::from(online));
    out
}
