//! Process-local in-flight dedup set (spec §4.4). Empty on restart;
//! at-least-once re-enqueue is fine because downstream work is idempotent.

use crawlmesh_common::types::{Collection, UpdateType};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InflightKey {
    pub update_type: UpdateType,
    pub collection: Collection,
}

#[derive(Default)]
pub struct InflightSet {
    inner: Mutex<HashSet<(InflightKey, String)>>,
}

impl InflightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `url` under `key` unless already present. Returns `true` if
    /// this call added it (caller should publish), `false` if it was
    /// already in flight (caller should skip).
    pub fn try_insert(&self, key: InflightKey, url: &str) -> bool {
        self.inner.lock().unwrap().insert((key, url.to_string()))
    }

    pub fn remove(&self, key: InflightKey, url: &str) {
        self.inner.lock().unwrap().remove(&(key, url.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> InflightKey {
        InflightKey { update_type: UpdateType::Crawl, collection: Collection::Feeds }
    }

    #[test]
    fn second_insert_for_same_key_and_url_is_rejected() {
        let set = InflightSet::new();
        assert!(set.try_insert(key(), "https://example.org/feed.xml"));
        assert!(!set.try_insert(key(), "https://example.org/feed.xml"));
    }

    #[test]
    fn different_urls_under_the_same_key_do_not_collide() {
        let set = InflightSet::new();
        assert!(set.try_insert(key(), "https://a.example.org/feed.xml"));
        assert!(set.try_insert(key(), "https://b.example.org/feed.xml"));
    }

    #[test]
    fn remove_allows_reinsertion() {
        let set = InflightSet::new();
        let k = key();
        assert!(set.try_insert(k, "https://example.org/feed.xml"));
        set.remove(k, "https://example.org/feed.xml");
        assert!(set.try_insert(k, "https://example.org/feed.xml"));
    }

    #[test]
    fn different_update_types_are_independent_keys() {
        let set = InflightSet::new();
        let url = "https://example.org/a";
        assert!(set.try_insert(InflightKey { update_type: UpdateType::Crawl, collection: Collection::Articles }, url));
        assert!(set.try_insert(InflightKey { update_type: UpdateType::Scrape, collection: Collection::Articles }, url));
    }
}
