use lru::LruCache;
use std::num::NonZeroUsize;
use crate::core::types::{Record, RecordId};

/// Bounded ID→body cache for one collection.
/// Entries are read with `peek`, so eviction follows insertion order.
pub struct RecordCache {
    pub cache: Option<LruCache<RecordId, Record>>,  // None when disabled
    pub size_limit: usize,
}

impl RecordCache {
    pub fn new(size_limit: usize) -> Self {
        RecordCache {
            cache: NonZeroUsize::new(size_limit).map(LruCache::new),
            size_limit,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Insert or refresh a body. A refreshed entry keeps its age.
    pub fn put(&mut self, id: RecordId, record: Record) {
        let Some(cache) = self.cache.as_mut() else {
            return;
        };
        if let Some(slot) = cache.peek_mut(&id) {
            *slot = record;
        } else {
            cache.put(id, record);
        }
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.cache.as_ref()?.peek(id)
    }

    /// Bodies for `lines` of `file`, only if every one is cached.
    pub fn get_file(&self, file: &str, lines: &[usize]) -> Option<Vec<Record>> {
        let cache = self.cache.as_ref()?;
        lines
            .iter()
            .map(|line| cache.peek(&RecordId::new(file, *line)).cloned())
            .collect()
    }

    pub fn evict(&mut self, id: &RecordId) {
        if let Some(cache) = self.cache.as_mut() {
            cache.pop(id);
        }
    }

    pub fn clear(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(n: i64) -> Record {
        json!({"n": n}).as_object().cloned().unwrap()
    }

    #[test]
    fn zero_size_disables_the_cache() {
        let mut cache = RecordCache::new(0);
        cache.put(RecordId::new("f", 0), body(0));
        assert!(!cache.is_enabled());
        assert!(cache.get(&RecordId::new("f", 0)).is_none());
    }

    #[test]
    fn evicts_oldest_insert_first() {
        let mut cache = RecordCache::new(2);
        cache.put(RecordId::new("f", 0), body(0));
        cache.put(RecordId::new("f", 1), body(1));
        // Reads and refreshes do not change eviction order.
        cache.get(&RecordId::new("f", 0));
        cache.put(RecordId::new("f", 0), body(10));
        cache.put(RecordId::new("f", 2), body(2));

        assert!(cache.get(&RecordId::new("f", 0)).is_none());
        assert_eq!(cache.get(&RecordId::new("f", 1)), Some(&body(1)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn file_hit_needs_every_line() {
        let mut cache = RecordCache::new(8);
        cache.put(RecordId::new("f", 0), body(0));
        cache.put(RecordId::new("f", 2), body(2));
        assert_eq!(cache.get_file("f", &[0, 2]), Some(vec![body(0), body(2)]));
        assert!(cache.get_file("f", &[0, 1]).is_none());

        cache.evict(&RecordId::new("f", 2));
        assert!(cache.get_file("f", &[2]).is_none());
    }
}
