use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use bytes::Bytes;
use lru::LruCache;

#[derive(Clone)]
struct CacheEntry {
    max_age: Duration,
    response: Bytes,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) < self.max_age
    }
}

/// 以 `Cache-Control: max-age` 为有效期的响应缓存。
///
/// 过期检查只在查询时进行，没有后台清理；容量满时淘汰最久未使用的条目。
pub struct ResponseCache {
    cache: LruCache<String, CacheEntry>,
}

impl ResponseCache {
    // 根据容量构造
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("调用from_capacity时指定的大小是0。如果需要自动设置大小，请在调用处进行处理，而不是传入0");
        }
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
        }
    }

    // 放入；同一个键上的新响应无条件覆盖旧响应
    pub fn store(&mut self, key: &str, max_age: u64, response: Bytes, now: Instant) {
        let entry = CacheEntry {
            max_age: Duration::from_secs(max_age),
            response,
            cached_at: now,
        };
        self.cache.put(key.to_string(), entry);
    }

    // 查询有效缓存，过期条目在这里被删除
    pub fn lookup(&mut self, key: &str, now: Instant) -> Option<Bytes> {
        let fresh = match self.cache.get(key) {
            Some(entry) => entry.is_fresh(now),
            None => return None,
        };
        if fresh {
            self.cache.peek(key).map(|entry| entry.response.clone())
        } else {
            self.cache.pop(key);
            None
        }
    }

    #[cfg(test)]
    pub fn remove(&mut self, key: &str) -> bool {
        self.cache.pop(key).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
