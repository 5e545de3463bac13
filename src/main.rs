use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use media_pool::cache::MediaDeliveryCache;
use media_pool::config::Config;
use media_pool::gateway::{TelegramGateway, UploadGateway};
use media_pool::maintenance::{MaintenanceScheduler, RevalidationSweeper, WarmUpOrchestrator};
use media_pool::media::AssetResolver;
use media_pool::storage::TenantStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("media_pool=debug".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🎞️ Iniciando Media Pool v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Overrides del tenant
    let mut storage = TenantStore::new(config.data_dir.clone()).await?;
    let tenant_config = storage.get_tenant_config(&config.tenant_id).await?;
    info!(
        "🏷️ Tenant '{}' con {} overrides de media",
        config.tenant_id,
        tenant_config.assets.len()
    );

    let resolver = Arc::new(AssetResolver::new(config.media_dir.clone(), tenant_config));
    let gateway = Arc::new(
        TelegramGateway::new(
            &config.telegram_api_url,
            config.telegram_token.clone(),
            config.storage_chat_id,
        )
        .context("No se pudo crear el cliente de Telegram")?,
    );
    info!("📡 Transporte: {}", gateway.transport_name());

    let cache = Arc::new(MediaDeliveryCache::new(
        config.tenant_id.clone(),
        config.pool_target_size,
    ));
    let warmup = Arc::new(WarmUpOrchestrator::new(
        cache.pool(),
        resolver,
        gateway.clone(),
        config.warmup_settings(),
    ));

    if std::env::args().any(|arg| arg == "--warm-once") {
        let report = warmup.warm_up(&config.critical_assets).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let sweeper = Arc::new(RevalidationSweeper::new(
        cache.pool(),
        gateway,
        warmup.clone(),
        config.sweep_settings(),
    ));

    let scheduler = Arc::new(MaintenanceScheduler::new(
        warmup,
        sweeper,
        config.schedule_settings(),
    ));
    let handle = scheduler.start();

    info!("🚀 Media Pool iniciado");

    cache
        .log_metrics_until(config.stats_interval, tokio::signal::ctrl_c())
        .await
        .context("Error al registrar Ctrl+C")?;
    info!("⚠️ Señal de shutdown recibida, cerrando...");

    handle.stop().await;
    info!("{}", cache.metrics_report());

    Ok(())
}
