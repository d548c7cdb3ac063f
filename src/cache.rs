use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::Mutex, time::Instant};

/// Expiring key/value store for access tokens. Each entry carries its own
/// lifetime since Google reports `expires_in` per grant.
#[derive(Clone)]
pub struct Cache<T> {
    entries: Arc<Mutex<HashMap<String, CacheEntry<T>>>>,
    max_size: usize,
}

struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_valid(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

impl<T: Clone> Cache<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            max_size,
        }
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        let cache = self.entries.lock().await;
        cache
            .get(key)
            .filter(|entry| entry.is_valid(Instant::now()))
            .map(|entry| entry.data.clone())
    }

    pub async fn insert(&self, key: String, value: T, ttl: Duration) {
        if self.max_size == 0 {
            return;
        }

        let mut cache = self.entries.lock().await;
        let now = Instant::now();

        if cache.len() >= self.max_size && !cache.contains_key(&key) {
            cache.retain(|_, entry| entry.is_valid(now));
        }

        if cache.len() >= self.max_size && !cache.contains_key(&key) {
            // Evict whichever entry would expire first
            if let Some(soonest) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&soonest);
            }
        }

        cache.insert(
            key,
            CacheEntry {
                data: value,
                expires_at: now + ttl,
            },
        );
    }

    pub async fn remove(&self, key: &str) -> Option<T> {
        let mut cache = self.entries.lock().await;
        cache.remove(key).map(|entry| entry.data)
    }

    pub async fn cleanup(&self) {
        let mut cache = self.entries.lock().await;
        let now = Instant::now();
        cache.retain(|_, entry| entry.is_valid(now));
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
