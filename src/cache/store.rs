//! TTL store partitioned by domain.
//!
//! Each domain gets its own bounded moka cache. moka evicts in the
//! background on capacity and wall-clock TTL; expiry as seen by callers is
//! decided by the entry's own `expires_at`, so an entry is never returned
//! past its TTL even before moka gets round to evicting it.

use crate::cache::types::{CacheConfig, CacheEntry, Lookup, Scope};
use crate::types::Domain;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct TtlStore<V> {
    partitions: HashMap<Domain, Cache<String, CacheEntry<V>>>,
}

impl<V> TtlStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        let partitions = Domain::ALL
            .into_iter()
            .map(|domain| {
                let cache = Cache::builder()
                    .max_capacity(config.max_entries_per_domain)
                    .time_to_live(config.policy(domain).ttl())
                    .build();
                (domain, cache)
            })
            .collect();

        Self { partitions }
    }

    fn partition(&self, domain: Domain) -> &Cache<String, CacheEntry<V>> {
        // new() creates a partition for every domain
        &self.partitions[&domain]
    }

    /// Look up a live entry. Expired entries are removed and reported as
    /// `Expired`.
    pub async fn get(&self, domain: Domain, key: &str) -> Lookup<V> {
        let partition = self.partition(domain);
        match partition.get(key).await {
            None => Lookup::Miss,
            Some(entry) if !entry.is_expired() => Lookup::Hit(entry.value),
            Some(_) => {
                // Remove only if still expired: a fresh value may have been
                // written since the read above
                let outcome = partition
                    .entry_by_ref(key)
                    .and_compute_with(|current| {
                        let op = match current {
                            Some(entry) if entry.value().is_expired() => Op::Remove,
                            _ => Op::Nop,
                        };
                        std::future::ready(op)
                    })
                    .await;

                match outcome {
                    CompResult::Unchanged(entry) => Lookup::Hit(entry.into_value().value),
                    _ => {
                        debug!("Expired {} entry for '{}' removed", domain, key);
                        Lookup::Expired
                    }
                }
            }
        }
    }

    /// Full entry lookup, including timing, for live entries only.
    pub async fn entry(&self, domain: Domain, key: &str) -> Option<CacheEntry<V>> {
        self.partition(domain)
            .get(key)
            .await
            .filter(|entry| !entry.is_expired())
    }

    /// Insert or replace the value for `key`.
    pub async fn put(&self, domain: Domain, key: &str, value: V, ttl: Duration) {
        let entry = CacheEntry::new(domain, key, value, ttl);
        self.partition(domain).insert(key.to_string(), entry).await;
    }

    /// Remove one entry. Returns whether a live entry was present.
    pub async fn invalidate(&self, domain: Domain, key: &str) -> bool {
        self.partition(domain)
            .remove(key)
            .await
            .is_some_and(|entry| !entry.is_expired())
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, scope: Scope) {
        for (domain, partition) in &self.partitions {
            if scope.includes(*domain) {
                let keys: Vec<String> = partition.iter().map(|(key, _)| key.as_ref().clone()).collect();
                for key in keys {
                    partition.invalidate(&key).await;
                }
                partition.run_pending_tasks().await;
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> usize {
        let mut removed = 0;
        for partition in self.partitions.values() {
            let expired: Vec<String> = partition
                .iter()
                .filter(|(_, entry)| entry.is_expired())
                .map(|(key, _)| key.as_ref().clone())
                .collect();

            for key in expired {
                if partition.remove(&key).await.is_some() {
                    removed += 1;
                }
            }
            partition.run_pending_tasks().await;
        }
        if removed > 0 {
            debug!("Swept {} expired entries", removed);
        }
        removed
    }

    /// Keys with a live entry in `domain`.
    pub fn keys(&self, domain: Domain) -> Vec<String> {
        self.partition(domain)
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(key, _)| key.as_ref().clone())
            .collect()
    }

    /// Live entry count in `domain`.
    pub fn len(&self, domain: Domain) -> usize {
        self.partition(domain)
            .iter()
            .filter(|(_, entry)| !entry.is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        Domain::ALL.into_iter().all(|domain| self.len(domain) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TtlStore<u64> {
        TtlStore::new(&CacheConfig::default())
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = store();
        assert_eq!(store.get(Domain::Markets, "bitcoin_market").await, Lookup::Miss);

        store.put(Domain::Markets, "bitcoin_market", 7, Duration::from_secs(60)).await;
        assert_eq!(store.get(Domain::Markets, "bitcoin_market").await, Lookup::Hit(7));
        // Domains are separate namespaces
        assert_eq!(store.get(Domain::Comments, "bitcoin_market").await, Lookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_removed() {
        let store = store();
        store.put(Domain::Markets, "eth_market", 1, Duration::from_secs(2)).await;

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get(Domain::Markets, "eth_market").await.is_hit());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get(Domain::Markets, "eth_market").await, Lookup::Expired);
        assert_eq!(store.get(Domain::Markets, "eth_market").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_put_replaces_value() {
        let store = store();
        store.put(Domain::Analysis, "ETH", 1, Duration::from_secs(60)).await;
        store.put(Domain::Analysis, "ETH", 2, Duration::from_secs(60)).await;
        assert_eq!(store.get(Domain::Analysis, "ETH").await.into_value(), Some(2));
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let store = store();
        store.put(Domain::Markets, "a", 1, Duration::from_secs(60)).await;
        store.put(Domain::Comments, "b", 2, Duration::from_secs(60)).await;

        assert!(store.invalidate(Domain::Markets, "a").await);
        assert!(!store.invalidate(Domain::Markets, "a").await);

        store.clear(Scope::Domain(Domain::Markets)).await;
        assert_eq!(store.get(Domain::Comments, "b").await, Lookup::Hit(2));

        store.clear(Scope::All).await;
        assert_eq!(store.get(Domain::Comments, "b").await, Lookup::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let store = store();
        store.put(Domain::Markets, "short", 1, Duration::from_secs(1)).await;
        store.put(Domain::Markets, "long", 2, Duration::from_secs(600)).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.sweep().await, 1);
        assert_eq!(store.keys(Domain::Markets), vec!["long".to_string()]);
        assert_eq!(store.len(Domain::Markets), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lookup_keeps_newer_value() {
        let store = store();
        store.put(Domain::Comments, "sol_market", 1, Duration::from_secs(1)).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.get(Domain::Comments, "sol_market").await, Lookup::Expired);
        store.put(Domain::Comments, "sol_market", 2, Duration::from_secs(60)).await;
        assert_eq!(store.get(Domain::Comments, "sol_market").await, Lookup::Hit(2));
        // A second expired lookup elsewhere does not disturb the live entry
        store.put(Domain::Comments, "ada_market", 3, Duration::from_secs(1)).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get(Domain::Comments, "ada_market").await, Lookup::Expired);
        assert_eq!(store.get(Domain::Comments, "sol_market").await, Lookup::Hit(2));
    }
}
