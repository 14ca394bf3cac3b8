//! Process-wide counters and loop liveness stamps
//!
//! Lock-free; shared as `Arc<Metrics>` by every component and read by the
//! health and metrics endpoints.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[inline]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// The two timer-driven loops whose liveness /health reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    DepositScanner,
    WithdrawalDispatcher,
}

impl LoopKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopKind::DepositScanner => "deposit_scanner",
            LoopKind::WithdrawalDispatcher => "withdrawal_dispatcher",
        }
    }
}

#[derive(Debug)]
pub struct Metrics {
    started_at_ms: i64,
    last_scan_ms: AtomicI64,
    last_dispatch_ms: AtomicI64,

    pub scan_cycles: Counter,
    pub scan_cycles_skipped: Counter,
    pub wallets_scanned: Counter,
    pub wallet_errors: Counter,
    pub deposits_credited: Counter,
    pub deposits_duplicate: Counter,
    pub deposits_failed: Counter,

    pub dispatch_cycles: Counter,
    pub dispatch_cycles_skipped: Counter,
    pub jobs_claimed: Counter,
    pub claim_conflicts: Counter,
    pub jobs_deferred: Counter,
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub stale_jobs_failed: Counter,
    pub reconcile_required: Counter,

    pub heartbeat_failures: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at_ms: now_ms(),
            last_scan_ms: AtomicI64::new(0),
            last_dispatch_ms: AtomicI64::new(0),
            scan_cycles: Counter::default(),
            scan_cycles_skipped: Counter::default(),
            wallets_scanned: Counter::default(),
            wallet_errors: Counter::default(),
            deposits_credited: Counter::default(),
            deposits_duplicate: Counter::default(),
            deposits_failed: Counter::default(),
            dispatch_cycles: Counter::default(),
            dispatch_cycles_skipped: Counter::default(),
            jobs_claimed: Counter::default(),
            claim_conflicts: Counter::default(),
            jobs_deferred: Counter::default(),
            jobs_completed: Counter::default(),
            jobs_failed: Counter::default(),
            stale_jobs_failed: Counter::default(),
            reconcile_required: Counter::default(),
            heartbeat_failures: Counter::default(),
        }
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    fn stamp(&self, kind: LoopKind) -> &AtomicI64 {
        match kind {
            LoopKind::DepositScanner => &self.last_scan_ms,
            LoopKind::WithdrawalDispatcher => &self.last_dispatch_ms,
        }
    }

    /// Mark a poll cycle of `kind` as finished now
    pub fn record_cycle(&self, kind: LoopKind) {
        self.record_cycle_at(kind, now_ms());
    }

    pub fn record_cycle_at(&self, kind: LoopKind, at_ms: i64) {
        self.stamp(kind).store(at_ms, Ordering::Relaxed);
    }

    /// Unix ms of the last finished cycle, if any
    pub fn last_cycle_ms(&self, kind: LoopKind) -> Option<i64> {
        match self.stamp(kind).load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scan_cycles: self.scan_cycles.get(),
            scan_cycles_skipped: self.scan_cycles_skipped.get(),
            wallets_scanned: self.wallets_scanned.get(),
            wallet_errors: self.wallet_errors.get(),
            deposits_credited: self.deposits_credited.get(),
            deposits_duplicate: self.deposits_duplicate.get(),
            deposits_failed: self.deposits_failed.get(),
            dispatch_cycles: self.dispatch_cycles.get(),
            dispatch_cycles_skipped: self.dispatch_cycles_skipped.get(),
            jobs_claimed: self.jobs_claimed.get(),
            claim_conflicts: self.claim_conflicts.get(),
            jobs_deferred: self.jobs_deferred.get(),
            jobs_completed: self.jobs_completed.get(),
            jobs_failed: self.jobs_failed.get(),
            stale_jobs_failed: self.stale_jobs_failed.get(),
            reconcile_required: self.reconcile_required.get(),
            heartbeat_failures: self.heartbeat_failures.get(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub scan_cycles: u64,
    pub scan_cycles_skipped: u64,
    pub wallets_scanned: u64,
    pub wallet_errors: u64,
    pub deposits_credited: u64,
    pub deposits_duplicate: u64,
    pub deposits_failed: u64,
    pub dispatch_cycles: u64,
    pub dispatch_cycles_skipped: u64,
    pub jobs_claimed: u64,
    pub claim_conflicts: u64,
    pub jobs_deferred: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub stale_jobs_failed: u64,
    pub reconcile_required: u64,
    pub heartbeat_failures: u64,
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
