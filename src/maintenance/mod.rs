//! # Maintenance Module
//!
//! Background work that keeps the rotating pools full and valid. Nothing in
//! here is ever called from, or awaited by, the foreground request path.
//!
//! - [`WarmUpOrchestrator`]: fills pools for critical assets (start-up, forced
//!   refresh, sweeper top-ups)
//! - [`RevalidationSweeper`]: probes pooled identifiers and prunes dead ones
//! - [`MaintenanceScheduler`]: owns the periodic tasks and their shutdown

pub mod scheduler;
pub mod sweeper;
pub mod warmup;

use std::sync::atomic::{AtomicBool, Ordering};

pub use scheduler::{MaintenanceScheduler, ScheduleSettings, SchedulerHandle};
pub use sweeper::{KeySweep, PoolWrite, RevalidationSweeper, SweepOutcome, SweepReport, SweepSettings};
pub use warmup::{KeyWarmUp, WarmUpOrchestrator, WarmUpReport, WarmUpSettings, WarmUpStatus};

/// Non-reentrant guard for a periodic cycle: a second caller is turned away
/// instead of queued.
#[derive(Debug, Default)]
pub struct CycleGuard {
    running: AtomicBool,
}

/// Marca de ciclo en curso; se libera al soltarse
#[derive(Debug)]
pub struct CycleToken<'a> {
    guard: &'a CycleGuard,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<CycleToken<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleToken { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for CycleToken<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}
