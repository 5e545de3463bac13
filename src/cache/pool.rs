use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use tracing::{debug, info};

use crate::media::{AssetKey, UploadedIdentifier};

pub const DEFAULT_TARGET_POOL_SIZE: usize = 3;

/// Pool de una asset key. Inmutable salvo el cursor: cualquier cambio de la
/// lista crea una entrada nueva que reemplaza a la anterior en el mapa.
#[derive(Debug)]
struct PoolEntry {
    identifiers: Vec<UploadedIdentifier>,
    // 0 <= cursor < identifiers.len() cuando la lista no está vacía
    cursor: AtomicUsize,
    generation: u64,
    refreshed_at: DateTime<Utc>,
}

impl PoolEntry {
    fn next(&self) -> Option<UploadedIdentifier> {
        let len = self.identifiers.len();
        if len == 0 {
            return None;
        }

        let idx = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|prev| prev);

        self.identifiers.get(idx % len).cloned()
    }
}

/// Consistent copy of one pool, as seen at a single instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub key: AssetKey,
    pub identifiers: Vec<UploadedIdentifier>,
    pub generation: u64,
    pub refreshed_at: DateTime<Utc>,
}

/// Rotating Pool Manager.
///
/// Holds, per asset key, an ordered list of pre-issued identifiers and hands
/// them out round-robin so bursts of concurrent sends spread over several
/// identifiers instead of one.
///
/// ## Concurrency
///
/// Each key maps to an `Arc<PoolEntry>`. Readers clone the `Arc` and release
/// the map shard immediately; writers swap the whole `Arc`. A reader racing a
/// replacement therefore sees either the old list or the new one, never a mix.
///
/// ## Health
///
/// A pool is healthy when it holds at least `ceil(target / 2)` identifiers
/// (2 for the default target of 3).
#[derive(Debug)]
pub struct RotatingPool {
    entries: DashMap<AssetKey, Arc<PoolEntry>>,
    target_size: usize,
    generations: AtomicU64,
}

impl Default for RotatingPool {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_POOL_SIZE)
    }
}

impl RotatingPool {
    pub fn new(target_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            target_size: target_size.max(1),
            generations: AtomicU64::new(0),
        }
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    pub fn healthy_threshold(&self) -> usize {
        self.target_size.div_ceil(2)
    }

    /// Next identifier in round-robin order, `None` when the pool is empty or unknown.
    pub fn next(&self, key: &AssetKey) -> Option<UploadedIdentifier> {
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        entry.next()
    }

    /// Swaps the whole list for `key` and resets the cursor. Duplicates are dropped.
    ///
    /// Returns the generation of the new entry.
    pub fn replace_pool(&self, key: &AssetKey, identifiers: Vec<UploadedIdentifier>) -> u64 {
        let entry = self.build_entry(identifiers);
        let generation = entry.generation;
        let size = entry.identifiers.len();

        self.entries.insert(key.clone(), Arc::new(entry));
        debug!("🔄 Pool de '{}' reemplazado: {} identificadores (gen {})", key, size, generation);
        generation
    }

    /// Like [`replace_pool`](Self::replace_pool), but only when the current
    /// entry still has generation `expected`. Used by writers that computed the
    /// new list from a snapshot and must not clobber a newer pool.
    pub fn replace_pool_if(
        &self,
        key: &AssetKey,
        expected: u64,
        identifiers: Vec<UploadedIdentifier>,
    ) -> bool {
        let Some(mut slot) = self.entries.get_mut(key) else {
            return false;
        };

        if slot.generation != expected {
            debug!("⏭️ Pool de '{}' cambió durante la operación (gen {} != {})", key, slot.generation, expected);
            return false;
        }

        *slot = Arc::new(self.build_entry(identifiers));
        true
    }

    /// Drops a single identifier the transport refused, keeping rotation order.
    pub fn remove_identifier(&self, key: &AssetKey, identifier: &UploadedIdentifier) -> bool {
        let Some(mut slot) = self.entries.get_mut(key) else {
            return false;
        };

        if !slot.identifiers.contains(identifier) {
            return false;
        }

        let remaining: Vec<UploadedIdentifier> = slot
            .identifiers
            .iter()
            .filter(|id| *id != identifier)
            .cloned()
            .collect();
        let cursor = match remaining.len() {
            0 => 0,
            len => slot.cursor.load(Ordering::Acquire) % len,
        };

        let entry = self.build_entry(remaining);
        entry.cursor.store(cursor, Ordering::Release);
        *slot = Arc::new(entry);

        info!("🚫 Identificador descartado del pool de '{}'", key);
        true
    }

    pub fn has_healthy_pool(&self, key: &AssetKey) -> bool {
        self.pool_size(key) >= self.healthy_threshold()
    }

    pub fn pool_size(&self, key: &AssetKey) -> usize {
        self.entries.get(key).map_or(0, |e| e.identifiers.len())
    }

    pub fn snapshot(&self, key: &AssetKey) -> Option<PoolSnapshot> {
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        Some(PoolSnapshot {
            key: key.clone(),
            identifiers: entry.identifiers.clone(),
            generation: entry.generation,
            refreshed_at: entry.refreshed_at,
        })
    }

    /// Snapshots of every known key, sorted by key.
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        let mut keys = self.keys();
        keys.sort();
        keys.iter().filter_map(|k| self.snapshot(k)).collect()
    }

    /// Every key that has ever had a pool, including emptied ones.
    pub fn keys(&self) -> Vec<AssetKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of keys with at least one identifier.
    pub fn pool_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.identifiers.is_empty()).count()
    }

    pub fn total_identifiers(&self) -> usize {
        self.entries.iter().map(|e| e.identifiers.len()).sum()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn build_entry(&self, identifiers: Vec<UploadedIdentifier>) -> PoolEntry {
        let mut unique: Vec<UploadedIdentifier> = Vec::with_capacity(identifiers.len());
        for id in identifiers {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        PoolEntry {
            identifiers: unique,
            cursor: AtomicUsize::new(0),
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            refreshed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn key(raw: &str) -> AssetKey {
        AssetKey::parse(raw).unwrap()
    }

    fn ids(raw: &[&str]) -> Vec<UploadedIdentifier> {
        raw.iter().map(|s| UploadedIdentifier::from(*s)).collect()
    }

    #[test]
    fn test_round_robin_wraps() {
        let pool = RotatingPool::default();
        pool.replace_pool(&key("inicial"), ids(&["A", "B", "C"]));

        let served: Vec<UploadedIdentifier> = (0..4).filter_map(|_| pool.next(&key("inicial"))).collect();
        assert_eq!(served, ids(&["A", "B", "C", "A"]));
    }

    #[test]
    fn test_unknown_and_empty_pools() {
        let pool = RotatingPool::default();
        assert_eq!(pool.next(&key("inicial")), None);
        assert_eq!(pool.pool_size(&key("inicial")), 0);
        assert!(!pool.has_healthy_pool(&key("inicial")));

        pool.replace_pool(&key("inicial"), ids(&["A", "B"]));
        assert!(pool.has_healthy_pool(&key("inicial")));

        pool.replace_pool(&key("inicial"), Vec::new());
        assert_eq!(pool.next(&key("inicial")), None);
        assert!(!pool.has_healthy_pool(&key("inicial")));
        assert_eq!(pool.pool_count(), 0);
        assert_eq!(pool.keys(), vec![key("inicial")]);
    }

    #[test]
    fn test_health_threshold_is_half_of_target() {
        let pool = RotatingPool::new(3);
        assert_eq!(pool.healthy_threshold(), 2);

        pool.replace_pool(&key("inicial"), ids(&["A"]));
        assert!(!pool.has_healthy_pool(&key("inicial")));
        pool.replace_pool(&key("inicial"), ids(&["A", "B"]));
        assert!(pool.has_healthy_pool(&key("inicial")));

        assert_eq!(RotatingPool::new(4).healthy_threshold(), 2);
        assert_eq!(RotatingPool::new(1).healthy_threshold(), 1);
    }

    #[test]
    fn test_replace_resets_cursor_and_dedupes() {
        let pool = RotatingPool::default();
        pool.replace_pool(&key("inicial"), ids(&["A", "B", "C"]));
        pool.next(&key("inicial"));
        pool.next(&key("inicial"));

        pool.replace_pool(&key("inicial"), ids(&["X", "Y", "X"]));
        assert_eq!(pool.pool_size(&key("inicial")), 2);
        assert_eq!(pool.next(&key("inicial")), Some("X".into()));
        assert_eq!(pool.next(&key("inicial")), Some("Y".into()));
    }

    #[test]
    fn test_replace_if_rejects_stale_generation() {
        let pool = RotatingPool::default();
        let first = pool.replace_pool(&key("inicial"), ids(&["A", "B"]));
        let second = pool.replace_pool(&key("inicial"), ids(&["C", "D", "E"]));
        assert!(second > first);

        assert!(!pool.replace_pool_if(&key("inicial"), first, ids(&["A"])));
        assert_eq!(pool.pool_size(&key("inicial")), 3);

        assert!(pool.replace_pool_if(&key("inicial"), second, ids(&["C"])));
        assert_eq!(pool.pool_size(&key("inicial")), 1);

        assert!(!pool.replace_pool_if(&key("downsell:1"), 1, ids(&["Z"])));
    }

    #[test]
    fn test_remove_identifier() {
        let pool = RotatingPool::default();
        pool.replace_pool(&key("inicial"), ids(&["A", "B", "C"]));
        assert_eq!(pool.next(&key("inicial")), Some("A".into()));

        assert!(pool.remove_identifier(&key("inicial"), &"B".into()));
        assert!(!pool.remove_identifier(&key("inicial"), &"B".into()));
        assert_eq!(pool.pool_size(&key("inicial")), 2);

        let served: Vec<UploadedIdentifier> = (0..2).filter_map(|_| pool.next(&key("inicial"))).collect();
        assert_eq!(served, ids(&["C", "A"]));
    }

    #[test]
    fn test_snapshots_sorted() {
        let pool = RotatingPool::default();
        pool.replace_pool(&key("downsell:2"), ids(&["B"]));
        pool.replace_pool(&key("downsell:1"), ids(&["A1", "A2"]));

        let snaps = pool.snapshots();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].key, key("downsell:1"));
        assert_eq!(snaps[0].identifiers, ids(&["A1", "A2"]));
        assert_eq!(pool.total_identifiers(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_next_covers_every_identifier() {
        let pool = Arc::new(RotatingPool::default());
        pool.replace_pool(&key("inicial"), ids(&["A", "B", "C"]));

        let handles: Vec<_> = (0..30)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.next(&key("inicial")) })
            })
            .collect();

        let mut counts: HashMap<UploadedIdentifier, usize> = HashMap::new();
        for handle in handles {
            let id = handle.await.unwrap().expect("pool is not empty");
            *counts.entry(id).or_default() += 1;
        }

        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replace_never_tears() {
        let pool = Arc::new(RotatingPool::default());
        let old = ids(&["A", "B", "C"]);
        let new = ids(&["X", "Y"]);
        pool.replace_pool(&key("inicial"), old.clone());

        let writer = {
            let pool = Arc::clone(&pool);
            let (old, new) = (old.clone(), new.clone());
            tokio::spawn(async move {
                for i in 0..200 {
                    let list = if i % 2 == 0 { new.clone() } else { old.clone() };
                    pool.replace_pool(&key("inicial"), list);
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    for _ in 0..200 {
                        if let Some(snap) = pool.snapshot(&key("inicial")) {
                            seen.push(snap.identifiers);
                        }
                        tokio::task::yield_now().await;
                    }
                    seen
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            for list in reader.await.unwrap() {
                assert!(list == old || list == new, "torn list observed: {:?}", list);
            }
        }
    }
}
