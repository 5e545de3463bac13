//! # Cache Module
//!
//! In-memory delivery cache for transport-issued media identifiers.
//!
//! Re-uploading a video or image to the messaging transport costs hundreds of
//! milliseconds to seconds. Once the transport has issued an identifier for an
//! upload, the same media can be sent again by identifier almost instantly.
//! This module keeps those identifiers around.
//!
//! ## Layers
//!
//! - **Rotating pool** ([`RotatingPool`]): several pre-issued identifiers per
//!   asset, served round-robin. Filled by the warm-up and revalidated by the
//!   sweeper, never by the request path.
//! - **Identifier cache** ([`IdentifierCache`]): the last identifier a caller
//!   obtained through a fresh upload. Fallback when the pool is empty.
//! - **Metrics** ([`MetricsRecorder`]): hits, forced uploads, failures and a
//!   moving average of send latency.
//!
//! ## Request path
//!
//! ```text
//! try_get_cached_identifier(key)
//!   ├─ pool hit   -> identifier (round-robin)
//!   ├─ cache hit  -> identifier
//!   └─ miss       -> caller uploads, then report_fresh_upload(key, id)
//! ```
//!
//! A send that fails with a cached identifier must be reported through
//! [`MediaDeliveryCache::report_send_failure`] so the next lookup forces a
//! fresh upload instead of handing back the dead identifier.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use media_pool::cache::MediaDeliveryCache;
//! use media_pool::media::AssetKey;
//!
//! # fn example() -> anyhow::Result<()> {
//! let store = MediaDeliveryCache::new("loja", 3);
//! let key = AssetKey::parse("downsell:3")?;
//!
//! if store.try_get_cached_identifier(&key).is_none() {
//!     // upload the media, then:
//!     store.report_fresh_upload(&key, "X1".into(), None);
//! }
//! assert!(store.try_get_cached_identifier(&key).is_some());
//! # Ok(())
//! # }
//! ```

pub mod identifier_cache;
pub mod metrics;
pub mod pool;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::media::{AssetKey, UploadedIdentifier};

pub use identifier_cache::IdentifierCache;
pub use metrics::{EfficiencyGrade, MetricsRecorder, MetricsReport};
pub use pool::{PoolSnapshot, RotatingPool, DEFAULT_TARGET_POOL_SIZE};

/// De dónde salió un identificador servido
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitOrigin {
    Pool,
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedIdentifier {
    pub identifier: UploadedIdentifier,
    pub origin: HitOrigin,
}

/// Conceptual per-key state of the delivery cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    /// Nothing cached, nothing pooled
    Cold,
    /// Only the single-value cache has an identifier
    SingleCached,
    /// The pool has at least one identifier
    Pooled,
    /// The pool was emptied by a sweep
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub key: AssetKey,
    pub size: usize,
    pub healthy: bool,
    pub generation: u64,
    pub refreshed_at: DateTime<Utc>,
}

/// Plain structured data for health endpoints and dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub tenant_id: String,
    pub target_pool_size: usize,
    pub pool_count: usize,
    pub pooled_identifiers: usize,
    pub cached_identifiers: usize,
    pub pools: Vec<PoolStats>,
    pub cached_keys: Vec<AssetKey>,
}

/// Per-tenant delivery cache store.
///
/// Owns the rotating pool, the single-value cache and the metrics for one
/// tenant. Background components get the pool through [`pool`](Self::pool);
/// the foreground send routine only uses the `try_get` / `report_*` methods.
pub struct MediaDeliveryCache {
    tenant_id: String,
    pool: Arc<RotatingPool>,
    cache: Arc<IdentifierCache>,
    metrics: Arc<MetricsRecorder>,
}

impl MediaDeliveryCache {
    pub fn new(tenant_id: impl Into<String>, target_pool_size: usize) -> Self {
        let tenant_id = tenant_id.into();
        info!("🗄️ Media cache iniciado para tenant '{}' (pool objetivo: {})", tenant_id, target_pool_size);

        Self {
            tenant_id,
            pool: Arc::new(RotatingPool::new(target_pool_size)),
            cache: Arc::new(IdentifierCache::new()),
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn pool(&self) -> Arc<RotatingPool> {
        Arc::clone(&self.pool)
    }

    pub fn identifier_cache(&self) -> Arc<IdentifierCache> {
        Arc::clone(&self.cache)
    }

    pub fn metrics(&self) -> Arc<MetricsRecorder> {
        Arc::clone(&self.metrics)
    }

    /// Pool first, then the single-value cache. `None` means "upload it yourself".
    pub fn try_get_cached_identifier(&self, key: &AssetKey) -> Option<CachedIdentifier> {
        if let Some(identifier) = self.pool.next(key) {
            self.metrics.record_hit();
            debug!("✅ Pool hit para '{}'", key);
            return Some(CachedIdentifier {
                identifier,
                origin: HitOrigin::Pool,
            });
        }

        if let Some(identifier) = self.cache.get(key) {
            self.metrics.record_hit();
            debug!("✅ Cache hit para '{}'", key);
            return Some(CachedIdentifier {
                identifier,
                origin: HitOrigin::Cache,
            });
        }

        debug!("❌ Miss para '{}', se requiere subida", key);
        None
    }

    /// The caller uploaded the media itself and got `identifier` back.
    pub fn report_fresh_upload(
        &self,
        key: &AssetKey,
        identifier: UploadedIdentifier,
        latency: Option<Duration>,
    ) {
        self.metrics.record_forced_upload();
        if let Some(elapsed) = latency {
            self.metrics.record_latency(elapsed);
        }

        debug!("💾 Identificador fresco para '{}' guardado en caché", key);
        self.cache.put(key.clone(), identifier);
    }

    /// A send using a cached identifier failed: forget the cached value.
    pub fn report_send_failure(&self, key: &AssetKey) {
        self.metrics.record_failure();
        if self.cache.invalidate(key) {
            info!("⚠️ Envío fallido para '{}', identificador en caché descartado", key);
        }
    }

    /// Like [`report_send_failure`](Self::report_send_failure) when the caller
    /// knows which identifier failed. Also drops it from the pool, and leaves a
    /// newer cached value alone.
    pub fn report_failed_identifier(&self, key: &AssetKey, identifier: &UploadedIdentifier) {
        self.metrics.record_failure();
        let from_cache = self.cache.invalidate_if(key, identifier);
        let from_pool = self.pool.remove_identifier(key, identifier);

        if from_cache || from_pool {
            info!(
                "⚠️ Identificador fallido descartado para '{}' (cache: {}, pool: {})",
                key, from_cache, from_pool
            );
        }
    }

    /// Latency of a send served from the pool or cache.
    pub fn record_delivery_latency(&self, elapsed: Duration) {
        self.metrics.record_latency(elapsed);
    }

    pub fn asset_state(&self, key: &AssetKey) -> AssetState {
        match self.pool.snapshot(key) {
            Some(snap) if !snap.identifiers.is_empty() => AssetState::Pooled,
            Some(_) => AssetState::Degraded,
            None if self.cache.get(key).is_some() => AssetState::SingleCached,
            None => AssetState::Cold,
        }
    }

    pub fn metrics_report(&self) -> MetricsReport {
        self.metrics.report(self.pool.pool_count())
    }

    pub fn cache_stats(&self) -> CacheStats {
        let pools: Vec<PoolStats> = self
            .pool
            .snapshots()
            .into_iter()
            .map(|snap| PoolStats {
                healthy: snap.identifiers.len() >= self.pool.healthy_threshold(),
                size: snap.identifiers.len(),
                generation: snap.generation,
                refreshed_at: snap.refreshed_at,
                key: snap.key,
            })
            .collect();

        CacheStats {
            tenant_id: self.tenant_id.clone(),
            target_pool_size: self.pool.target_size(),
            pool_count: pools.iter().filter(|p| p.size > 0).count(),
            pooled_identifiers: pools.iter().map(|p| p.size).sum(),
            cached_identifiers: self.cache.len(),
            pools,
            cached_keys: self.cache.keys(),
        }
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Vacía pool y caché (desmontaje del tenant)
    pub fn clear(&self) {
        self.pool.clear();
        self.cache.clear();
        info!("🧹 Media cache del tenant '{}' vaciado", self.tenant_id);
    }

    /// Loguea el reporte de métricas cada `period` hasta que `shutdown` resuelva.
    ///
    /// `shutdown` se sondea siempre sobre el mismo futuro, así que una señal
    /// que llega entre dos ticks no se pierde.
    pub async fn log_metrics_until<F: Future>(&self, period: Duration, shutdown: F) -> F::Output {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // El primer tick es inmediato y los pools todavía están vacíos
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                output = &mut shutdown => return output,
                _ = ticker.tick() => {
                    info!("{}", self.metrics_report());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(raw: &str) -> AssetKey {
        AssetKey::parse(raw).unwrap()
    }

    #[test]
    fn test_miss_then_reported_upload_hits() {
        let store = MediaDeliveryCache::new("loja", 3);
        let k = key("downsell:3");

        assert_eq!(store.try_get_cached_identifier(&k), None);
        store.report_fresh_upload(&k, "X1".into(), Some(Duration::from_millis(800)));

        assert_eq!(
            store.try_get_cached_identifier(&k),
            Some(CachedIdentifier {
                identifier: "X1".into(),
                origin: HitOrigin::Cache,
            })
        );

        let report = store.metrics_report();
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.forced_uploads, 1);
        assert_eq!(report.avg_latency_ms, 800.0);
    }

    #[test]
    fn test_pool_is_consulted_before_cache() {
        let store = MediaDeliveryCache::new("loja", 3);
        let k = key("inicial");
        store.report_fresh_upload(&k, "single".into(), None);
        store.pool().replace_pool(&k, vec!["A".into(), "B".into()]);

        let hit = store.try_get_cached_identifier(&k).unwrap();
        assert_eq!(hit.origin, HitOrigin::Pool);
        assert_eq!(hit.identifier, "A".into());

        store.pool().replace_pool(&k, Vec::new());
        let hit = store.try_get_cached_identifier(&k).unwrap();
        assert_eq!(hit.origin, HitOrigin::Cache);
        assert_eq!(hit.identifier, "single".into());
    }

    #[test]
    fn test_send_failure_forces_fresh_upload() {
        let store = MediaDeliveryCache::new("loja", 3);
        let k = key("inicial");
        store.report_fresh_upload(&k, "X1".into(), None);

        store.report_send_failure(&k);

        assert_eq!(store.identifier_cache().get(&k), None);
        assert_eq!(store.try_get_cached_identifier(&k), None);
        assert_eq!(store.metrics_report().failures, 1);
    }

    #[test]
    fn test_failed_identifier_leaves_pool_rotation_without_it() {
        let store = MediaDeliveryCache::new("loja", 3);
        let k = key("inicial");
        store.pool().replace_pool(&k, vec!["A".into(), "B".into(), "C".into()]);

        store.report_failed_identifier(&k, &"A".into());

        let served: Vec<UploadedIdentifier> = (0..3)
            .filter_map(|_| store.try_get_cached_identifier(&k))
            .map(|hit| hit.identifier)
            .collect();
        assert_eq!(served, vec!["B".into(), "C".into(), "B".into()]);
    }

    #[test]
    fn test_asset_state_transitions() {
        let store = MediaDeliveryCache::new("loja", 3);
        let k = key("inicial");
        assert_eq!(store.asset_state(&k), AssetState::Cold);

        store.report_fresh_upload(&k, "X1".into(), None);
        assert_eq!(store.asset_state(&k), AssetState::SingleCached);

        store.pool().replace_pool(&k, vec!["A".into()]);
        assert_eq!(store.asset_state(&k), AssetState::Pooled);

        store.pool().replace_pool(&k, Vec::new());
        assert_eq!(store.asset_state(&k), AssetState::Degraded);
    }

    #[test]
    fn test_cache_stats() {
        let store = MediaDeliveryCache::new("loja", 3);
        store.pool().replace_pool(&key("inicial"), vec!["A".into(), "B".into(), "C".into()]);
        store.pool().replace_pool(&key("downsell:1"), vec!["D".into()]);
        store.report_fresh_upload(&key("downsell:2"), "E".into(), None);

        let stats = store.cache_stats();
        assert_eq!(stats.tenant_id, "loja");
        assert_eq!(stats.pool_count, 2);
        assert_eq!(stats.pooled_identifiers, 4);
        assert_eq!(stats.cached_identifiers, 1);
        assert_eq!(stats.cached_keys, vec![key("downsell:2")]);

        let health: Vec<(String, bool)> = stats
            .pools
            .iter()
            .map(|p| (p.key.to_string(), p.healthy))
            .collect();
        assert_eq!(
            health,
            vec![("downsell:1".to_string(), false), ("inicial".to_string(), true)]
        );

        store.clear();
        assert_eq!(store.cache_stats().pools.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_between_reports_is_not_lost() {
        let store = MediaDeliveryCache::new("loja", 3);
        let (tx, rx) = tokio::sync::oneshot::channel::<&'static str>();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            let _ = tx.send("ctrl-c");
        });

        let started = tokio::time::Instant::now();
        let signal = store
            .log_metrics_until(Duration::from_millis(10), rx)
            .await
            .unwrap();

        assert_eq!(signal, "ctrl-c");
        assert!(started.elapsed() < Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_ready_shutdown_returns_immediately() {
        let store = MediaDeliveryCache::new("loja", 3);
        let output = store
            .log_metrics_until(Duration::from_secs(3600), async { 7 })
            .await;
        assert_eq!(output, 7);
    }
}
