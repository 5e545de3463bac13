use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::media::{AssetKey, UploadedIdentifier};

/// Entrada de caché sin TTL: sólo se borra explícitamente
#[derive(Debug, Clone)]
struct CacheEntry {
    identifier: UploadedIdentifier,
    stored_at: DateTime<Utc>,
}

/// Single-valued cache: asset key -> last identifier a caller uploaded.
///
/// There is no expiry. Callers must [`invalidate`](Self::invalidate) an entry
/// as soon as a send using it fails. Racing `put`s on one key are
/// last-writer-wins.
#[derive(Debug, Default, Clone)]
pub struct IdentifierCache {
    data: Arc<DashMap<AssetKey, CacheEntry>>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &AssetKey) -> Option<UploadedIdentifier> {
        self.data.get(key).map(|entry| entry.identifier.clone())
    }

    /// Devuelve el valor anterior si existía
    pub fn put(&self, key: AssetKey, identifier: UploadedIdentifier) -> Option<UploadedIdentifier> {
        let entry = CacheEntry {
            identifier,
            stored_at: Utc::now(),
        };
        self.data.insert(key, entry).map(|old| old.identifier)
    }

    pub fn invalidate(&self, key: &AssetKey) -> bool {
        let removed = self.data.remove(key).is_some();
        if removed {
            debug!("🗑️ Identificador en caché invalidado para '{}'", key);
        }
        removed
    }

    /// Borra sólo si el valor actual es `identifier`, para no pisar una subida más reciente
    pub fn invalidate_if(&self, key: &AssetKey, identifier: &UploadedIdentifier) -> bool {
        self.data
            .remove_if(key, |_, entry| &entry.identifier == identifier)
            .is_some()
    }

    pub fn clear(&self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> Vec<AssetKey> {
        let mut keys: Vec<AssetKey> = self.data.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn stored_at(&self, key: &AssetKey) -> Option<DateTime<Utc>> {
        self.data.get(key).map(|entry| entry.stored_at)
    }
}
