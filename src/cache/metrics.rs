use serde::Serialize;
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tracing::info;

/// Coarse label for operator dashboards. Has no effect on caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EfficiencyGrade {
    Excellent,
    Good,
    Low,
}

impl EfficiencyGrade {
    pub fn from_hit_rate(hit_rate: f64) -> Self {
        match hit_rate {
            r if r > 0.8 => EfficiencyGrade::Excellent,
            r if r > 0.6 => EfficiencyGrade::Good,
            _ => EfficiencyGrade::Low,
        }
    }
}

impl fmt::Display for EfficiencyGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EfficiencyGrade::Excellent => "excellent",
            EfficiencyGrade::Good => "good",
            EfficiencyGrade::Low => "low",
        };
        f.write_str(label)
    }
}

/// Marca de "todavía sin muestras" en `avg_latency`
const NO_SAMPLE: u64 = u64::MAX;

/// Contadores de vida del proceso. Todo atómico, sin locks.
#[derive(Debug)]
pub struct MetricsRecorder {
    cache_hits: AtomicU64,
    forced_uploads: AtomicU64,
    failures: AtomicU64,
    // Microsegundos, promedio móvil simple
    avg_latency: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub cache_hits: u64,
    pub forced_uploads: u64,
    pub failures: u64,
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
    pub pool_count: usize,
    pub grade: EfficiencyGrade,
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "📊 Media cache: {:.1}% hits ({} hits / {} uploads), {} fallos, {:.1}ms promedio, {} pools, eficiencia {}",
            self.hit_rate * 100.0,
            self.cache_hits,
            self.forced_uploads,
            self.failures,
            self.avg_latency_ms,
            self.pool_count,
            self.grade
        )
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            forced_uploads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            avg_latency: AtomicU64::new(NO_SAMPLE),
        }
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forced_upload(&self) {
        self.forced_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let sample = elapsed.as_micros().min(u128::from(NO_SAMPLE - 1)) as u64;

        let _ = self
            .avg_latency
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                if current == NO_SAMPLE {
                    Some(sample)
                } else {
                    // Factor de suavizado
                    Some((current.saturating_mul(3).saturating_add(sample)) / 4)
                }
            });
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed) as f64;
        let uploads = self.forced_uploads.load(Ordering::Relaxed) as f64;
        let total = hits + uploads;

        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    pub fn report(&self, pool_count: usize) -> MetricsReport {
        let hit_rate = self.hit_rate();

        MetricsReport {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            forced_uploads: self.forced_uploads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            hit_rate,
            avg_latency_ms: match self.avg_latency.load(Ordering::Relaxed) {
                NO_SAMPLE => 0.0,
                micros => micros as f64 / 1000.0,
            },
            pool_count,
            grade: EfficiencyGrade::from_hit_rate(hit_rate),
        }
    }

    /// Reinicio manual por parte de un operador
    pub fn reset(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.forced_uploads.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.avg_latency.store(NO_SAMPLE, Ordering::Relaxed);
        info!("🧹 Métricas del media cache reiniciadas");
    }
}
