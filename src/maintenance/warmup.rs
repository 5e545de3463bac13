use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::HashSet,
    sync::Arc,
    time::Duration,
};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::cache::RotatingPool;
use crate::error::UploadError;
use crate::gateway::UploadGateway;
use crate::media::{AssetKey, AssetResolver, MediaKind, UploadedIdentifier};

#[derive(Debug, Clone)]
pub struct WarmUpSettings {
    pub target_pool_size: usize,
    /// Pausa entre subidas para no saturar el transporte
    pub inter_call_delay: Duration,
    pub upload_timeout: Duration,
    /// Presupuesto total de una ejecución de warm-up
    pub budget: Duration,
}

impl Default for WarmUpSettings {
    fn default() -> Self {
        Self {
            target_pool_size: 3,
            inter_call_delay: Duration::from_millis(100),
            upload_timeout: Duration::from_secs(60),
            budget: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmUpStatus {
    /// Every upload succeeded
    Warmed,
    /// Some uploads failed, the pool got what succeeded
    Partial,
    /// No upload succeeded, the existing pool was left alone
    Failed,
    /// The asset did not resolve to any media
    NotFound,
    /// Another warm-up for this key was still running
    AlreadyRunning,
    /// The run budget ran out before this key was finished
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyWarmUp {
    pub key: AssetKey,
    pub status: WarmUpStatus,
    pub kind: Option<MediaKind>,
    pub secured: usize,
    pub failed_uploads: usize,
    /// Last upload error, if any upload failed
    pub last_error: Option<String>,
    /// Pool size after the warm-up
    pub pool_size: usize,
}

impl KeyWarmUp {
    fn skipped(key: &AssetKey, status: WarmUpStatus, pool_size: usize) -> Self {
        Self {
            key: key.clone(),
            status,
            kind: None,
            secured: 0,
            failed_uploads: 0,
            last_error: None,
            pool_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmUpReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub keys: Vec<KeyWarmUp>,
}

impl WarmUpReport {
    pub fn secured_for(&self, key: &AssetKey) -> usize {
        self.keys
            .iter()
            .filter(|k| &k.key == key)
            .map(|k| k.secured)
            .sum()
    }

    pub fn total_secured(&self) -> usize {
        self.keys.iter().map(|k| k.secured).sum()
    }

    pub fn status_of(&self, key: &AssetKey) -> Option<WarmUpStatus> {
        self.keys.iter().find(|k| &k.key == key).map(|k| k.status)
    }
}

/// Claim on a key for the duration of one warm-up; released on drop, so a
/// cancelled warm-up frees its keys too.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<AssetKey>>,
    key: AssetKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Proactively fills the rotating pool for a list of critical assets.
///
/// Per key: resolve the media, perform up to `target_pool_size` sequential
/// uploads with `inter_call_delay` between them, and install whatever came
/// back. A failed upload is logged and skipped, never retried inline, and a
/// warm-up never returns an error: everything ends up in the
/// [`WarmUpReport`].
///
/// Two warm-ups never work on the same key at once; the later one reports
/// [`WarmUpStatus::AlreadyRunning`] for it.
pub struct WarmUpOrchestrator {
    pool: Arc<RotatingPool>,
    resolver: Arc<AssetResolver>,
    gateway: Arc<dyn UploadGateway>,
    settings: WarmUpSettings,
    in_flight: Mutex<HashSet<AssetKey>>,
}

impl WarmUpOrchestrator {
    pub fn new(
        pool: Arc<RotatingPool>,
        resolver: Arc<AssetResolver>,
        gateway: Arc<dyn UploadGateway>,
        settings: WarmUpSettings,
    ) -> Self {
        Self {
            pool,
            resolver,
            gateway,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &WarmUpSettings {
        &self.settings
    }

    pub fn is_running(&self, key: &AssetKey) -> bool {
        self.in_flight.lock().contains(key)
    }

    pub async fn warm_up(&self, keys: &[AssetKey]) -> WarmUpReport {
        self.warm_up_before(keys, Instant::now() + self.settings.budget).await
    }

    /// Like [`warm_up`](Self::warm_up), but never runs past `limit` even when
    /// the warm-up budget would allow it.
    pub async fn warm_up_before(&self, keys: &[AssetKey], limit: Instant) -> WarmUpReport {
        let started_at = Utc::now();
        let deadline = limit.min(Instant::now() + self.settings.budget);
        let mut seen = HashSet::new();
        let mut results = Vec::with_capacity(keys.len());

        info!("🔥 Warm-up iniciado para {} assets vía {}", keys.len(), self.gateway.transport_name());

        for key in keys.iter().filter(|k| seen.insert(*k)) {
            if Instant::now() >= deadline {
                warn!("⏰ Presupuesto de warm-up agotado antes de '{}'", key);
                results.push(KeyWarmUp::skipped(key, WarmUpStatus::BudgetExhausted, self.pool.pool_size(key)));
                continue;
            }

            let Some(_claim) = self.try_claim(key) else {
                warn!("⏭️ Warm-up de '{}' ya en curso, se omite", key);
                results.push(KeyWarmUp::skipped(key, WarmUpStatus::AlreadyRunning, self.pool.pool_size(key)));
                continue;
            };

            results.push(self.warm_key(key, deadline).await);
        }

        let report = WarmUpReport {
            started_at,
            finished_at: Utc::now(),
            keys: results,
        };

        info!(
            "✅ Warm-up completado: {} identificadores en {} assets ({}ms)",
            report.total_secured(),
            report.keys.len(),
            (report.finished_at - report.started_at).num_milliseconds()
        );
        report
    }

    /// Single-key warm-up bounded by `limit`, used by the sweeper to top up a
    /// shrunken pool within its own cycle budget.
    pub async fn warm_up_key_before(&self, key: &AssetKey, limit: Instant) -> KeyWarmUp {
        let report = self.warm_up_before(std::slice::from_ref(key), limit).await;
        report
            .keys
            .into_iter()
            .next()
            .unwrap_or_else(|| KeyWarmUp::skipped(key, WarmUpStatus::Failed, self.pool.pool_size(key)))
    }

    fn try_claim(&self, key: &AssetKey) -> Option<InFlight<'_>> {
        let mut set = self.in_flight.lock();
        if !set.insert(key.clone()) {
            return None;
        }

        Some(InFlight {
            set: &self.in_flight,
            key: key.clone(),
        })
    }

    async fn warm_key(&self, key: &AssetKey, deadline: Instant) -> KeyWarmUp {
        let asset = match self.resolver.resolve(key) {
            Ok(asset) => asset,
            Err(e) => {
                warn!("⚠️ {}; warm-up omitido", e);
                return KeyWarmUp::skipped(key, WarmUpStatus::NotFound, self.pool.pool_size(key));
            }
        };

        let target = self.settings.target_pool_size.max(1);
        let mut secured: Vec<UploadedIdentifier> = Vec::with_capacity(target);
        let mut failed_uploads = 0;
        let mut last_error = None;
        let mut budget_exhausted = false;

        debug!("📤 Warm-up de '{}': {} desde {}", key, asset.kind, asset.source);

        for attempt in 0..target {
            if attempt > 0 && !self.settings.inter_call_delay.is_zero() {
                sleep(self.settings.inter_call_delay).await;
            }

            let now = Instant::now();
            if now >= deadline {
                budget_exhausted = true;
                break;
            }
            let call_budget = self.settings.upload_timeout.min(deadline - now);

            let outcome = match timeout(call_budget, self.gateway.upload(&asset.source, asset.kind)).await {
                Ok(result) => result,
                Err(_) => Err(UploadError::Timeout(call_budget)),
            };

            match outcome {
                Ok(identifier) => {
                    debug!("✅ Subida {}/{} de '{}' ok", attempt + 1, target, key);
                    secured.push(identifier);
                }
                Err(e) => {
                    failed_uploads += 1;
                    warn!("❌ Subida {}/{} de '{}' falló: {}", attempt + 1, target, key, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        let secured_count = secured.len();
        let pool_size = self.install(key, secured, target);

        let status = if budget_exhausted && secured_count < target {
            WarmUpStatus::BudgetExhausted
        } else if secured_count == target {
            WarmUpStatus::Warmed
        } else if secured_count == 0 {
            WarmUpStatus::Failed
        } else {
            WarmUpStatus::Partial
        };

        info!("🔥 '{}': {}/{} identificadores, pool = {}", key, secured_count, target, pool_size);

        KeyWarmUp {
            key: key.clone(),
            status,
            kind: Some(asset.kind),
            secured: secured_count,
            failed_uploads,
            last_error,
            pool_size,
        }
    }

    /// Installs fresh identifiers. A short batch is topped up with the
    /// identifiers already pooled, so a warm-up never shrinks a pool; an empty
    /// batch leaves the pool untouched.
    fn install(&self, key: &AssetKey, fresh: Vec<UploadedIdentifier>, target: usize) -> usize {
        if fresh.is_empty() {
            return self.pool.pool_size(key);
        }

        let mut list = fresh;
        if list.len() < target {
            let existing = self.pool.snapshot(key).map(|s| s.identifiers).unwrap_or_default();
            for id in existing {
                if list.len() >= target {
                    break;
                }
                if !list.contains(&id) {
                    list.push(id);
                }
            }
        }

        self.pool.replace_pool(key, list);
        self.pool.pool_size(key)
    }
}
