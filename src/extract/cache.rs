//! Bounded text cache with random eviction.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;

pub struct PageCache {
    entries: Mutex<HashMap<String, String>>,
    capacity: usize,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn get(&self, url: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
    }

    /// Insert, evicting a random entry when full. Empty text is not cached.
    pub fn insert(&self, url: &str, text: &str) {
        if self.capacity == 0 || text.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if !entries.contains_key(url) && entries.len() >= self.capacity {
            let victim = rand::rng().random_range(0..entries.len());
            if let Some(key) = entries.keys().nth(victim).cloned() {
                entries.remove(&key);
            }
        }
        entries.insert(url.to_string(), text.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_exceeds_capacity() {
        let cache = PageCache::new(3);
        for i in 0..20 {
            cache.insert(&format!("https://example.com/{}", i), "text");
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get("https://example.com/19").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let cache = PageCache::new(2);
        cache.insert("a", "1");
        cache.insert("b", "2");
        cache.insert("a", "3");
        assert_eq!(cache.get("a").as_deref(), Some("3"));
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn test_empty_text_not_cached() {
        let cache = PageCache::new(2);
        cache.insert("a", "");
        assert!(cache.is_empty());
    }
}
