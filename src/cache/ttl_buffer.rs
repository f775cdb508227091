use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::debug;

/// Entrada con su instante de expiración
#[derive(Debug, Clone)]
struct BufferEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> BufferEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired_removals: AtomicU64,
}

/// Buffer concurrente con expiración por entrada
#[derive(Debug)]
pub struct TtlBuffer<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, BufferEntry<V>>>,
    counters: Arc<Counters>,
    ttl: Duration,
}

impl<K, V> TtlBuffer<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            ttl,
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_with_ttl(key, value, self.ttl)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<V> {
        let entry = BufferEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.data.insert(key, entry).map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let value = match self.data.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(entry) => {
                drop(entry);
                self.data.remove(key);
                self.counters.expired_removals.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        };

        let counter = if value.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.data.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Vacía el buffer y retorna el número de elementos removidos
    pub fn clear(&self) -> usize {
        let removed = self.data.len();
        self.data.clear();
        removed
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            self.counters
                .expired_removals
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Limpiadas {} entradas expiradas del buffer", removed);
        }

        removed
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired_removals: self.counters.expired_removals.load(Ordering::Relaxed),
        }
    }
}

impl<K, V> Clone for TtlBuffer<K, V>
where
    K: Clone + Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            counters: self.counters.clone(),
            ttl: self.ttl,
        }
    }
}

/// Métricas básicas del buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferMetrics {
    pub hits: u64,
    pub misses: u64,
    pub expired_removals: u64,
}

impl BufferMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
