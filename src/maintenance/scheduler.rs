use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval, interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{RevalidationSweeper, SweepOutcome, SweepReport, WarmUpOrchestrator, WarmUpReport};
use crate::media::AssetKey;

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub sweep_interval: Duration,
    pub refresh_interval: Duration,
    /// Assets calentados al arrancar
    pub startup_keys: Vec<AssetKey>,
    /// Assets recalentados en cada refresh, sin importar su salud
    pub refresh_keys: Vec<AssetKey>,
    pub warm_on_start: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(2 * 3600),
            refresh_interval: Duration::from_secs(6 * 3600),
            startup_keys: Vec::new(),
            refresh_keys: Vec::new(),
            warm_on_start: true,
        }
    }
}

/// Owns the two periodic maintenance tasks.
///
/// - **sweep**: [`RevalidationSweeper::sweep`] every `sweep_interval`, first
///   run one full period after start
/// - **refresh**: optional start-up warm-up, then a forced
///   [`WarmUpOrchestrator::warm_up`] of `refresh_keys` every
///   `refresh_interval`
///
/// Missed ticks are skipped rather than replayed. Single cycles can be driven
/// directly through [`run_sweep_cycle`](Self::run_sweep_cycle) and
/// [`run_refresh_cycle`](Self::run_refresh_cycle).
pub struct MaintenanceScheduler {
    warmup: Arc<WarmUpOrchestrator>,
    sweeper: Arc<RevalidationSweeper>,
    settings: ScheduleSettings,
}

/// Handle of the running tasks. Dropping it does not stop them; call
/// [`stop`](Self::stop).
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancela las tareas y espera a que terminen
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Tarea de mantenimiento terminó con error: {:?}", e);
            }
        }
        info!("🛑 Tareas de mantenimiento detenidas");
    }
}

impl MaintenanceScheduler {
    pub fn new(
        warmup: Arc<WarmUpOrchestrator>,
        sweeper: Arc<RevalidationSweeper>,
        settings: ScheduleSettings,
    ) -> Self {
        Self {
            warmup,
            sweeper,
            settings,
        }
    }

    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let cancel = CancellationToken::new();

        info!(
            "⏱️ Mantenimiento programado: sweep cada {}, refresh cada {}",
            humantime::format_duration(self.settings.sweep_interval),
            humantime::format_duration(self.settings.refresh_interval)
        );

        let sweep_task = tokio::spawn(Arc::clone(&self).sweep_loop(cancel.child_token()));
        let refresh_task = tokio::spawn(Arc::clone(&self).refresh_loop(cancel.child_token()));

        SchedulerHandle {
            cancel,
            tasks: vec![sweep_task, refresh_task],
        }
    }

    pub async fn run_sweep_cycle(&self) -> SweepReport {
        let report = self.sweeper.sweep().await;
        if let SweepOutcome::Aborted(reason) = &report.outcome {
            warn!("🔁 Sweep abortado ({}), se reintenta en el próximo ciclo", reason);
        }
        report
    }

    pub async fn run_refresh_cycle(&self) -> WarmUpReport {
        self.warmup.warm_up(&self.settings.refresh_keys).await
    }

    pub async fn run_startup_warm_up(&self) -> WarmUpReport {
        self.warmup.warm_up(&self.settings.startup_keys).await
    }

    async fn sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.settings.sweep_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.run_sweep_cycle() => {}
            }
        }
    }

    async fn refresh_loop(self: Arc<Self>, cancel: CancellationToken) {
        if self.settings.warm_on_start && !self.settings.startup_keys.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.run_startup_warm_up() => {}
            }
        }

        let period = self.settings.refresh_interval;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // El primer tick de `interval` es inmediato
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.settings.refresh_keys.is_empty() {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.run_refresh_cycle() => {}
            }
        }
    }
}
