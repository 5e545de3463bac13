use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::{warmup::KeyWarmUp, CycleGuard, WarmUpOrchestrator};
use crate::cache::{PoolSnapshot, RotatingPool};
use crate::error::ProbeError;
use crate::gateway::IdentifierProbe;
use crate::media::{AssetKey, UploadedIdentifier};

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub probe_timeout: Duration,
    /// Presupuesto del ciclo completo: sondeo y recargas
    pub budget: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            budget: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed,
    /// The probe transport was down; no pool was modified
    Aborted(String),
    /// Probing did not finish within the budget; no pool was modified
    BudgetExceeded,
    /// A previous sweep was still running
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolWrite {
    /// Every identifier passed, nothing written
    Unchanged,
    /// The pruned list replaced the pool
    Applied,
    /// The pool was replaced while probing; the pruned list was discarded
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySweep {
    pub key: AssetKey,
    pub before: usize,
    pub after: usize,
    pub write: PoolWrite,
    pub top_up: Option<KeyWarmUp>,
}

impl KeySweep {
    pub fn pruned(&self) -> usize {
        self.before - self.after
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: SweepOutcome,
    pub keys: Vec<KeySweep>,
}

impl SweepReport {
    fn empty(started_at: DateTime<Utc>, outcome: SweepOutcome) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            outcome,
            keys: Vec::new(),
        }
    }

    pub fn pruned_total(&self) -> usize {
        self.keys.iter().map(KeySweep::pruned).sum()
    }

    pub fn key(&self, key: &AssetKey) -> Option<&KeySweep> {
        self.keys.iter().find(|k| &k.key == key)
    }
}

/// Periodic revalidation of every pooled identifier.
///
/// A cycle has two phases. First every identifier of every non-empty pool is
/// probed; nothing is written yet, so an outage (`ProbeError::Unavailable`)
/// or an exhausted budget aborts the cycle with all pools intact. Then the
/// survivors are written back, guarded by the generation observed in the
/// snapshot so a concurrent warm-up is never clobbered. Keys left below
/// `ceil(target / 2)` identifiers, including pools already emptied by an
/// earlier cycle, are topped up through the [`WarmUpOrchestrator`].
///
/// The sweeper itself never adds identifiers to a pool.
pub struct RevalidationSweeper {
    pool: Arc<RotatingPool>,
    probe: Arc<dyn IdentifierProbe>,
    warmup: Arc<WarmUpOrchestrator>,
    settings: SweepSettings,
    guard: CycleGuard,
}

impl RevalidationSweeper {
    pub fn new(
        pool: Arc<RotatingPool>,
        probe: Arc<dyn IdentifierProbe>,
        warmup: Arc<WarmUpOrchestrator>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            pool,
            probe,
            warmup,
            settings,
            guard: CycleGuard::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    pub async fn sweep(&self) -> SweepReport {
        let started_at = Utc::now();
        // El presupuesto cubre el ciclo completo, recargas incluidas
        let deadline = Instant::now() + self.settings.budget;

        let Some(_cycle) = self.guard.try_begin() else {
            warn!("⏭️ Sweep anterior todavía en curso, se omite este ciclo");
            return SweepReport::empty(started_at, SweepOutcome::Skipped);
        };

        let snapshots = self.pool.snapshots();
        let (to_probe, emptied): (Vec<PoolSnapshot>, Vec<PoolSnapshot>) =
            snapshots.into_iter().partition(|s| !s.identifiers.is_empty());

        info!("🔎 Sweep iniciado: {} pools a verificar", to_probe.len());

        let probed = match timeout_at(deadline, self.probe_all(&to_probe)).await {
            Ok(Ok(probed)) => probed,
            Ok(Err(outage)) => {
                error!("🚨 Transporte de sondeo caído, sweep abortado: {}", outage);
                return SweepReport::empty(started_at, SweepOutcome::Aborted(outage.to_string()));
            }
            Err(_) => {
                warn!("⏰ Sweep superó su presupuesto de {:?}, abortado", self.settings.budget);
                return SweepReport::empty(started_at, SweepOutcome::BudgetExceeded);
            }
        };

        let threshold = self.pool.healthy_threshold();
        let mut keys = Vec::with_capacity(probed.len() + emptied.len());

        for (snapshot, survivors) in probed {
            let before = snapshot.identifiers.len();
            let after = survivors.len();

            let write = if after == before {
                PoolWrite::Unchanged
            } else if self.pool.replace_pool_if(&snapshot.key, snapshot.generation, survivors) {
                info!("🧹 '{}': {} identificadores inválidos eliminados ({} -> {})", snapshot.key, before - after, before, after);
                PoolWrite::Applied
            } else {
                PoolWrite::Stale
            };

            let top_up = if write != PoolWrite::Stale && after < threshold {
                info!("📉 Pool de '{}' por debajo del umbral ({} < {}), recargando", snapshot.key, after, threshold);
                Some(self.warmup.warm_up_key_before(&snapshot.key, deadline).await)
            } else {
                None
            };

            keys.push(KeySweep {
                key: snapshot.key,
                before,
                after,
                write,
                top_up,
            });
        }

        for snapshot in emptied {
            debug!("🪫 Pool vacío para '{}', recargando", snapshot.key);
            let top_up = self.warmup.warm_up_key_before(&snapshot.key, deadline).await;
            keys.push(KeySweep {
                key: snapshot.key,
                before: 0,
                after: 0,
                write: PoolWrite::Unchanged,
                top_up: Some(top_up),
            });
        }

        let report = SweepReport {
            started_at,
            finished_at: Utc::now(),
            outcome: SweepOutcome::Completed,
            keys,
        };

        info!("✅ Sweep completado: {} pools, {} identificadores eliminados", report.keys.len(), report.pruned_total());
        report
    }

    async fn probe_all(
        &self,
        snapshots: &[PoolSnapshot],
    ) -> Result<Vec<(PoolSnapshot, Vec<UploadedIdentifier>)>, ProbeError> {
        let mut results = Vec::with_capacity(snapshots.len());

        for snapshot in snapshots {
            let checks = join_all(snapshot.identifiers.iter().map(|id| self.probe_one(id))).await;

            let mut survivors = Vec::with_capacity(snapshot.identifiers.len());
            for (id, check) in snapshot.identifiers.iter().zip(checks) {
                match check {
                    Ok(true) => survivors.push(id.clone()),
                    Ok(false) => debug!("❌ '{}': identificador inválido", snapshot.key),
                    Err(e) if e.is_outage() => return Err(e),
                    Err(e) => debug!("❌ '{}': sondeo fallido ({}), se descarta", snapshot.key, e),
                }
            }

            results.push((snapshot.clone(), survivors));
        }

        Ok(results)
    }

    async fn probe_one(&self, identifier: &UploadedIdentifier) -> Result<bool, ProbeError> {
        let limit = self.settings.probe_timeout;
        match timeout(limit, self.probe.probe(identifier)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(limit)),
        }
    }
}
