//! Timer-driven cycles
//!
//! [`run_periodic`] fires a cycle on every tick and lets in-flight cycles
//! finish on shutdown. [`CycleGuard`] is the in-memory re-entrancy flag each
//! cycle takes first, so a tick that lands while the previous cycle is still
//! running is skipped instead of overlapping it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::shutdown::Shutdown;

#[derive(Debug, Default)]
pub struct CycleGuard {
    running: AtomicBool,
}

/// Held for the duration of one cycle; releases the guard on drop
pub struct CyclePermit<'a> {
    running: &'a AtomicBool,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if a cycle is already running
    pub fn try_enter(&self) -> Option<CyclePermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit {
                running: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for CyclePermit<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Spawn `cycle()` every `period` until shutdown, then wait for in-flight cycles.
///
/// The first cycle starts immediately. Cycles run as their own tasks so a slow
/// one never delays the tick; overlap is prevented by the cycle's own guard.
pub async fn run_periodic<F, Fut>(name: &'static str, period: Duration, mut shutdown: Shutdown, mut cycle: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut inflight = JoinSet::new();

    info!(loop_name = name, period_ms = period.as_millis() as u64, "Loop started");

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                inflight.spawn(cycle());
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    error!(loop_name = name, error = %e, "Cycle task panicked");
                }
            }
        }
    }

    if !inflight.is_empty() {
        info!(loop_name = name, inflight = inflight.len(), "Waiting for in-flight cycles");
    }
    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            error!(loop_name = name, error = %e, "Cycle task panicked");
        }
    }
    info!(loop_name = name, "Loop stopped");
}
