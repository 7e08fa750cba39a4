//! Bounded LRU of successful access-token lookups.
//!
//! DESIGN
//! ======
//! Maps a plaintext token to its row id so repeat requests skip the
//! last-eight scan and HMAC comparison. The id is always re-read from the
//! database, so a stale entry can only cost one extra query and is evicted
//! when the row is gone. Capacity `0` disables the cache entirely.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct AccessTokenCache {
    inner: Option<Arc<Mutex<CacheInner>>>,
    capacity: usize,
}

struct CacheInner {
    ids: HashMap<String, i64>,
    /// Least recently used at the front.
    order: VecDeque<String>,
}

impl CacheInner {
    fn touch(&mut self, token: &str) {
        if let Some(pos) = self.order.iter().position(|t| t == token) {
            if let Some(entry) = self.order.remove(pos) {
                self.order.push_back(entry);
            }
        }
    }

    fn forget(&mut self, token: &str) {
        self.ids.remove(token);
        self.order.retain(|t| t != token);
    }
}

impl AccessTokenCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            return Self::disabled();
        }
        Self {
            inner: Some(Arc::new(Mutex::new(CacheInner {
                ids: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }))),
            capacity,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { inner: None, capacity: 0 }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut CacheInner) -> T) -> Option<T> {
        let inner = self.inner.as_ref()?;
        let mut guard = inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Some(f(&mut guard))
    }

    /// Cached token id, marking the entry most recently used.
    #[must_use]
    pub fn get(&self, token: &str) -> Option<i64> {
        self.with_inner(|inner| {
            let id = inner.ids.get(token).copied()?;
            inner.touch(token);
            Some(id)
        })
        .flatten()
    }

    pub fn insert(&self, token: &str, id: i64) {
        let capacity = self.capacity;
        self.with_inner(|inner| {
            if inner.ids.insert(token.to_owned(), id).is_some() {
                inner.touch(token);
                return;
            }
            inner.order.push_back(token.to_owned());
            while inner.order.len() > capacity {
                if let Some(evicted) = inner.order.pop_front() {
                    inner.ids.remove(&evicted);
                }
            }
        });
    }

    pub fn remove(&self, token: &str) {
        self.with_inner(|inner| inner.forget(token));
    }

    /// Drop every entry pointing at token row `id`.
    pub fn remove_id(&self, id: i64) {
        self.with_inner(|inner| {
            let stale: Vec<String> = inner
                .ids
                .iter()
                .filter(|(_, cached)| **cached == id)
                .map(|(token, _)| token.clone())
                .collect();
            for token in stale {
                inner.forget(&token);
            }
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.with_inner(|inner| inner.ids.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "token_cache_test.rs"]
mod tests;
