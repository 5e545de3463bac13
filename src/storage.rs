use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::media::{AssetKey, AssetOverride, TenantMediaConfig};

/// Manager de overrides de media por tenant, en archivos JSON
pub struct TenantStore {
    data_dir: PathBuf,
    tenants_cache: HashMap<String, TenantMediaConfig>,
}

impl TenantStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let tenants_dir = data_dir.join("tenants");
        fs::create_dir_all(&tenants_dir).await?;

        info!("📁 Storage de tenants inicializado en: {}", tenants_dir.display());

        let mut storage = Self {
            data_dir,
            tenants_cache: HashMap::new(),
        };

        // Cargar configuraciones existentes
        storage.load_all_tenants().await?;

        Ok(storage)
    }

    /// Obtiene la configuración de un tenant, creando una vacía si no existe
    pub async fn get_tenant_config(&mut self, tenant_id: &str) -> Result<TenantMediaConfig> {
        validate_tenant_id(tenant_id)?;

        if let Some(config) = self.tenants_cache.get(tenant_id) {
            return Ok(config.clone());
        }

        // Sólo se crea la configuración por defecto si el archivo no existe;
        // un JSON roto se reporta y se deja intacto en disco
        if fs::try_exists(self.tenant_file_path(tenant_id)).await? {
            let config = self
                .load_tenant_config(tenant_id)
                .await
                .with_context(|| format!("Configuración ilegible para tenant {}", tenant_id))?;
            self.tenants_cache.insert(tenant_id.to_string(), config.clone());
            return Ok(config);
        }

        let config = TenantMediaConfig {
            tenant_id: tenant_id.to_string(),
            ..Default::default()
        };

        self.save_tenant_config(&config).await?;
        self.tenants_cache.insert(tenant_id.to_string(), config.clone());

        info!("📝 Configuración por defecto creada para tenant {}", tenant_id);
        Ok(config)
    }

    pub async fn update_tenant_config(&mut self, config: TenantMediaConfig) -> Result<()> {
        validate_tenant_id(&config.tenant_id)?;

        self.save_tenant_config(&config).await?;
        info!("💾 Configuración actualizada para tenant {}", config.tenant_id);
        self.tenants_cache.insert(config.tenant_id.clone(), config);

        Ok(())
    }

    /// Fija las ubicaciones explícitas de un asset
    pub async fn set_asset_override(
        &mut self,
        tenant_id: &str,
        key: AssetKey,
        location: AssetOverride,
    ) -> Result<()> {
        let mut config = self.get_tenant_config(tenant_id).await?;
        config.assets.insert(key, location);
        self.update_tenant_config(config).await
    }

    /// Devuelve `true` si existía un override para el asset
    pub async fn remove_asset_override(&mut self, tenant_id: &str, key: &AssetKey) -> Result<bool> {
        let mut config = self.get_tenant_config(tenant_id).await?;
        let removed = config.assets.remove(key).is_some();
        if removed {
            self.update_tenant_config(config).await?;
        }
        Ok(removed)
    }

    pub fn list_tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self.tenants_cache.keys().cloned().collect();
        tenants.sort();
        tenants
    }

    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let mut files = fs::read_dir(self.tenants_dir()).await?;
        let mut file_count = 0;
        let mut total_size = 0;

        while let Some(entry) = files.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                file_count += 1;
                if let Ok(metadata) = entry.metadata().await {
                    total_size += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            tenant_configs: file_count,
            cached_configs: self.tenants_cache.len(),
            total_size_bytes: total_size,
            data_dir: self.data_dir.clone(),
        })
    }

    // Métodos privados

    async fn load_tenant_config(&self, tenant_id: &str) -> Result<TenantMediaConfig> {
        let content = fs::read_to_string(self.tenant_file_path(tenant_id)).await?;
        let mut config: TenantMediaConfig = serde_json::from_str(&content)?;
        // El nombre del archivo manda sobre el contenido
        config.tenant_id = tenant_id.to_string();
        Ok(config)
    }

    async fn save_tenant_config(&self, config: &TenantMediaConfig) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        fs::write(self.tenant_file_path(&config.tenant_id), content).await?;
        Ok(())
    }

    async fn load_all_tenants(&mut self) -> Result<()> {
        let mut files = fs::read_dir(self.tenants_dir()).await?;
        let mut loaded_count = 0;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "json") {
                let Some(tenant_id) = path
                    .file_stem()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("tenant_"))
                else {
                    continue;
                };

                match self.load_tenant_config(tenant_id).await {
                    Ok(config) => {
                        self.tenants_cache.insert(tenant_id.to_string(), config);
                        loaded_count += 1;
                    }
                    Err(e) => {
                        warn!("Error cargando configuración para tenant {}: {}", tenant_id, e);
                    }
                }
            }
        }

        if loaded_count > 0 {
            info!("📂 Cargadas {} configuraciones de tenant", loaded_count);
        }

        Ok(())
    }

    fn tenants_dir(&self) -> PathBuf {
        self.data_dir.join("tenants")
    }

    fn tenant_file_path(&self, tenant_id: &str) -> PathBuf {
        self.tenants_dir().join(format!("tenant_{}.json", tenant_id))
    }
}

fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    let valid = !tenant_id.is_empty()
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !valid {
        anyhow::bail!("Tenant id inválido: {:?}", tenant_id);
    }
    Ok(())
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub tenant_configs: usize,
    pub cached_configs: usize,
    pub total_size_bytes: u64,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage Stats:\n\
             📁 Data Directory: {}\n\
             📝 Tenant Configs: {} files\n\
             💾 Cached Configs: {} in memory\n\
             📦 Total Size: {} bytes ({:.2} KB)",
            self.data_dir.display(),
            self.tenant_configs,
            self.cached_configs,
            self.total_size_bytes,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn key(raw: &str) -> AssetKey {
        AssetKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_tenant_gets_persisted_default() {
        let dir = TempDir::new().unwrap();
        let mut store = TenantStore::new(dir.path().to_path_buf()).await.unwrap();

        let config = store.get_tenant_config("acme").await.unwrap();
        assert_eq!(config.tenant_id, "acme");
        assert!(config.assets.is_empty());
        assert!(dir.path().join("tenants/tenant_acme.json").is_file());
        assert_eq!(store.list_tenants(), vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn test_overrides_survive_reload() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = TenantStore::new(dir.path().to_path_buf()).await.unwrap();
            store
                .set_asset_override(
                    "acme",
                    key("downsell:2"),
                    AssetOverride {
                        video: Some("https://cdn.example.com/d2.mp4".to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let mut store = TenantStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.list_tenants(), vec!["acme".to_string()]);

        let config = store.get_tenant_config("acme").await.unwrap();
        let location = config.assets.get(&key("downsell:2")).unwrap();
        assert_eq!(location.video.as_deref(), Some("https://cdn.example.com/d2.mp4"));

        assert!(store.remove_asset_override("acme", &key("downsell:2")).await.unwrap());
        assert!(!store.remove_asset_override("acme", &key("downsell:2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_files_are_skipped_on_load() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tenants")).unwrap();
        std::fs::write(dir.path().join("tenants/tenant_broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("tenants/notes.txt"), "ignored").unwrap();

        let store = TenantStore::new(dir.path().to_path_buf()).await.unwrap();
        assert!(store.list_tenants().is_empty());

        let stats = store.get_storage_stats().await.unwrap();
        assert_eq!(stats.tenant_configs, 1);
        assert_eq!(stats.cached_configs, 0);
    }

    #[tokio::test]
    async fn test_malformed_file_is_reported_and_left_untouched() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tenants")).unwrap();
        let path = dir.path().join("tenants/tenant_acme.json");
        let broken = r#"{ "tenant_id": "acme", "assets": { "inicial": { "video": "a.mp4" }, } }"#;
        std::fs::write(&path, broken).unwrap();

        let mut store = TenantStore::new(dir.path().to_path_buf()).await.unwrap();

        let err = store.get_tenant_config("acme").await.unwrap_err();
        assert!(err.to_string().contains("acme"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);

        let update = store
            .set_asset_override("acme", key("downsell:1"), AssetOverride::default())
            .await;
        assert!(update.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), broken);
    }

    #[tokio::test]
    async fn test_path_like_tenant_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = TenantStore::new(dir.path().to_path_buf()).await.unwrap();

        assert!(store.get_tenant_config("../etc").await.is_err());
        assert!(store.get_tenant_config("").await.is_err());
    }
}
