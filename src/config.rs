use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::maintenance::{ScheduleSettings, SweepSettings, WarmUpSettings};
use crate::media::AssetKey;

#[derive(Debug, Clone)]
pub struct Config {
    // Tenant
    pub tenant_id: String,

    // Telegram
    pub telegram_token: String,
    pub storage_chat_id: i64,
    pub telegram_api_url: String,

    // Pools
    pub pool_target_size: usize,
    pub warmup_delay: Duration,
    pub upload_timeout: Duration,
    pub probe_timeout: Duration,
    pub warmup_budget: Duration,
    pub sweep_budget: Duration,

    // Programación
    pub sweep_interval: Duration,
    pub refresh_interval: Duration,
    pub stats_interval: Duration,
    pub critical_assets: Vec<AssetKey>,
    pub refresh_assets: Vec<AssetKey>,

    // Paths
    pub media_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|name| std::env::var(name).ok())?;

        // Crear directorio de datos si no existe
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;

        Ok(config)
    }

    /// Builds and validates a config from an arbitrary variable source.
    ///
    /// [`load`](Self::load) uses the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let critical_assets = match var("CRITICAL_ASSETS") {
            Some(raw) => AssetKey::parse_list(&raw).context("CRITICAL_ASSETS inválido")?,
            None => defaults.critical_assets.clone(),
        };
        let refresh_assets = match var("REFRESH_ASSETS") {
            Some(raw) => AssetKey::parse_list(&raw).context("REFRESH_ASSETS inválido")?,
            None => critical_assets.clone(),
        };

        let config = Self {
            tenant_id: var("TENANT_ID").unwrap_or(defaults.tenant_id),

            // Telegram (sin valores por defecto)
            telegram_token: var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN no definido")?,
            storage_chat_id: var("TELEGRAM_STORAGE_CHAT_ID")
                .context("TELEGRAM_STORAGE_CHAT_ID no definido")?
                .trim()
                .parse()
                .context("TELEGRAM_STORAGE_CHAT_ID debe ser numérico")?,
            telegram_api_url: var("TELEGRAM_API_URL").unwrap_or(defaults.telegram_api_url),

            pool_target_size: parse_or(var("POOL_TARGET_SIZE"), "POOL_TARGET_SIZE", defaults.pool_target_size)?,
            warmup_delay: duration_or(var("WARMUP_DELAY"), "WARMUP_DELAY", defaults.warmup_delay)?,
            upload_timeout: duration_or(var("UPLOAD_TIMEOUT"), "UPLOAD_TIMEOUT", defaults.upload_timeout)?,
            probe_timeout: duration_or(var("PROBE_TIMEOUT"), "PROBE_TIMEOUT", defaults.probe_timeout)?,
            warmup_budget: duration_or(var("WARMUP_BUDGET"), "WARMUP_BUDGET", defaults.warmup_budget)?,
            sweep_budget: duration_or(var("SWEEP_BUDGET"), "SWEEP_BUDGET", defaults.sweep_budget)?,

            sweep_interval: duration_or(var("SWEEP_INTERVAL"), "SWEEP_INTERVAL", defaults.sweep_interval)?,
            refresh_interval: duration_or(var("REFRESH_INTERVAL"), "REFRESH_INTERVAL", defaults.refresh_interval)?,
            stats_interval: duration_or(var("STATS_INTERVAL"), "STATS_INTERVAL", defaults.stats_interval)?,
            critical_assets,
            refresh_assets,

            media_dir: var("MEDIA_DIR").map(PathBuf::from).unwrap_or(defaults.media_dir),
            data_dir: var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Pool target size between 1 and 20
    /// - Timeouts, budgets and intervals must be non-zero
    /// - Upload timeout cannot exceed the warm-up budget
    /// - At least one critical asset
    pub fn validate(&self) -> Result<()> {
        if self.telegram_token.trim().is_empty() {
            anyhow::bail!("Telegram token must not be empty");
        }

        if self.pool_target_size == 0 || self.pool_target_size > 20 {
            anyhow::bail!("Pool target size must be between 1 and 20, got: {}", self.pool_target_size);
        }

        for (name, value) in [
            ("UPLOAD_TIMEOUT", self.upload_timeout),
            ("PROBE_TIMEOUT", self.probe_timeout),
            ("WARMUP_BUDGET", self.warmup_budget),
            ("SWEEP_BUDGET", self.sweep_budget),
            ("SWEEP_INTERVAL", self.sweep_interval),
            ("REFRESH_INTERVAL", self.refresh_interval),
            ("STATS_INTERVAL", self.stats_interval),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.upload_timeout > self.warmup_budget {
            anyhow::bail!(
                "Upload timeout ({}) cannot exceed the warm-up budget ({})",
                humantime::format_duration(self.upload_timeout),
                humantime::format_duration(self.warmup_budget)
            );
        }

        if self.critical_assets.is_empty() {
            anyhow::bail!("At least one critical asset is required");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The bot token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Tenant: {} (media: {}, data: {})\n  \
            Telegram: {} (chat {})\n  \
            Pools: {} ids, {} delay, {} upload timeout, {} probe timeout\n  \
            Schedule: sweep every {}, refresh every {}, stats every {}\n  \
            Assets: critical [{}], refresh [{}]",
            self.tenant_id,
            self.media_dir.display(),
            self.data_dir.display(),
            self.telegram_api_url,
            self.storage_chat_id,
            self.pool_target_size,
            humantime::format_duration(self.warmup_delay),
            humantime::format_duration(self.upload_timeout),
            humantime::format_duration(self.probe_timeout),
            humantime::format_duration(self.sweep_interval),
            humantime::format_duration(self.refresh_interval),
            humantime::format_duration(self.stats_interval),
            join_keys(&self.critical_assets),
            join_keys(&self.refresh_assets),
        )
    }

    pub fn warmup_settings(&self) -> WarmUpSettings {
        WarmUpSettings {
            target_pool_size: self.pool_target_size,
            inter_call_delay: self.warmup_delay,
            upload_timeout: self.upload_timeout,
            budget: self.warmup_budget,
        }
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            probe_timeout: self.probe_timeout,
            budget: self.sweep_budget,
        }
    }

    pub fn schedule_settings(&self) -> ScheduleSettings {
        ScheduleSettings {
            sweep_interval: self.sweep_interval,
            refresh_interval: self.refresh_interval,
            startup_keys: self.critical_assets.clone(),
            refresh_keys: self.refresh_assets.clone(),
            warm_on_start: true,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        let critical_assets: Vec<AssetKey> = AssetKey::parse("inicial").into_iter().collect();

        Self {
            tenant_id: "default".to_string(),

            // Telegram (el token no tiene valor por defecto)
            telegram_token: String::new(),
            storage_chat_id: 0,
            telegram_api_url: "https://api.telegram.org".to_string(),

            pool_target_size: 3,
            warmup_delay: Duration::from_millis(100),
            upload_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            warmup_budget: Duration::from_secs(10 * 60),
            sweep_budget: Duration::from_secs(10 * 60),

            sweep_interval: Duration::from_secs(2 * 3600),
            refresh_interval: Duration::from_secs(6 * 3600),
            stats_interval: Duration::from_secs(3600),
            refresh_assets: critical_assets.clone(),
            critical_assets,

            media_dir: "./media".into(),
            data_dir: "./data".into(),
        }
    }
}

fn parse_or<T>(raw: Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} inválido: {:?}", name, value)),
        None => Ok(default),
    }
}

fn duration_or(raw: Option<String>, name: &str, default: Duration) -> Result<Duration> {
    match raw {
        Some(value) => humantime::parse_duration(value.trim())
            .with_context(|| format!("{} inválido: {:?}", name, value)),
        None => Ok(default),
    }
}

fn join_keys(keys: &[AssetKey]) -> String {
    keys.iter().map(AssetKey::as_str).collect::<Vec<_>>().join(", ")
}
