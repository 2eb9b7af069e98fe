use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::debug;
use shared_album_api::AlbumResponse;

/// Bounded, time-expiring store of resolved album responses, keyed by album
/// identifier. Expiry is lazy (checked on read); once the map is full, the
/// oldest-inserted entry is dropped to make room for a new key. Not an LRU:
/// reads never refresh an entry's position.
pub struct AlbumCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    max_entries: usize,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Keys in insertion order, front = oldest.
    order: VecDeque<String>,
}

struct CacheEntry {
    data: Arc<AlbumResponse>,
    inserted: Instant,
}

impl AlbumCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            ttl,
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<AlbumResponse>> {
        self.get_at(key, Instant::now())
    }

    pub fn set(&self, key: &str, data: Arc<AlbumResponse>) {
        self.set_at(key, data, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Arc<AlbumResponse>> {
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if now.duration_since(entry.inserted) < self.ttl => {
                Some(entry.data.clone())
            }
            Some(_) => {
                debug!("Cache entry for album {key} expired");
                inner.entries.remove(key);
                inner.order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    fn set_at(&self, key: &str, data: Arc<AlbumResponse>, now: Instant) {
        let mut inner = self.lock();
        let entry = CacheEntry {
            data,
            inserted: now,
        };
        if inner.entries.insert(key.to_owned(), entry).is_some() {
            // overwrite keeps the key's original insertion position
            return;
        }
        if inner.entries.len() > self.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                debug!("Cache full, evicting album {oldest}");
                inner.entries.remove(&oldest);
            }
        }
        inner.order.push_back(key.to_owned());
    }
}
