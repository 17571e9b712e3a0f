use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use fieldx::fxstruct;
use moka::future::Cache;
use moka::ops::compute::CompResult;
use moka::ops::compute::Op;
use moka::policy::EvictionPolicy;
use moka::Expiry;

use crate::error::Error;
use crate::error::Result;
use crate::traits::CacheBackend;

#[derive(Debug, Clone)]
enum Slot {
    Value(Arc<String>),
    Map(Arc<HashMap<String, String>>),
}

// Every write restarts the entry's TTL, reads leave it as is.
struct SlidingTtl {
    ttl: Option<Duration>,
}

impl Expiry<String, Slot> for SlidingTtl {
    fn expire_after_create(&self, _key: &String, _value: &Slot, _created_at: Instant) -> Option<Duration> {
        self.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        _value: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.ttl
    }
}

fn wrong_type(key: &str) -> Error {
    Error::Cache(format!("WRONGTYPE key '{key}' holds a different kind of value"))
}

/// In-process cache backend.
///
/// ```ignore
/// let cache = MemoryCache::builder()
///     .ttl(Duration::from_secs(600))
///     .max_capacity(50_000)
///     .build()?;
/// ```
#[fxstruct(sync, no_new, builder)]
pub struct MemoryCache {
    /// Cache name, used in logs.
    #[fieldx(get(clone), default(String::from("memory")))]
    name: String,

    /// Zero disables expiration.
    #[fieldx(get(copy), default(Duration::from_secs(3600)))]
    ttl: Duration,

    #[fieldx(get(copy), default(100_000))]
    max_capacity: u64,

    /// Make [`exists()`](CacheBackend::exists) restart the TTL of a found key.
    #[fieldx(get(copy), default(true))]
    sliding_exists: bool,

    #[fieldx(lazy, get(clone), builder(off))]
    cache: Arc<Cache<String, Slot>>,
}

impl MemoryCache {
    fn build_cache(&self) -> Arc<Cache<String, Slot>> {
        Arc::new(
            Cache::builder()
                .name(&self.name())
                .max_capacity(self.max_capacity())
                .eviction_policy(EvictionPolicy::tiny_lfu())
                .expire_after(SlidingTtl { ttl: self.ttl_opt() })
                .build(),
        )
    }

    fn ttl_opt(&self) -> Option<Duration> {
        let ttl = self.ttl();
        if ttl.is_zero() {
            None
        }
        else {
            Some(ttl)
        }
    }

    // Re-put the current value so that its TTL restarts. Returns whether the key exists.
    async fn touch(&self, key: &str) -> bool {
        let outcome = self
            .cache()
            .entry(key.to_owned())
            .and_compute_with(|entry| async move {
                match entry {
                    Some(entry) => Op::Put(entry.into_value()),
                    None => Op::Nop,
                }
            })
            .await;
        !matches!(outcome, CompResult::StillNone(_))
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache().invalidate_all();
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("name", &self.name())
            .field("ttl", &self.ttl())
            .field("max_capacity", &self.max_capacity())
            .finish()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        if self.sliding_exists() && self.ttl_opt().is_some() {
            Ok(self.touch(key).await)
        }
        else {
            Ok(self.cache().get(key).await.is_some())
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.cache().get(key).await {
            Some(Slot::Value(value)) => Ok(Some(value.as_ref().clone())),
            Some(Slot::Map(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.cache().insert(key.to_owned(), Slot::Value(Arc::new(value))).await;
        Ok(())
    }

    async fn add_if_absent(&self, key: &str, value: String) -> Result<bool> {
        let entry = self
            .cache()
            .entry(key.to_owned())
            .or_insert(Slot::Value(Arc::new(value)))
            .await;
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.cache().remove(key).await.is_some())
    }

    async fn refresh_ttl(&self, key: &str) -> Result<()> {
        if self.ttl_opt().is_some() {
            self.touch(key).await;
        }
        Ok(())
    }

    async fn map_get(&self, key: &str, sub_key: &str) -> Result<Option<String>> {
        match self.cache().get(key).await {
            Some(Slot::Map(map)) => Ok(map.get(sub_key).cloned()),
            Some(Slot::Value(_)) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn map_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        match self.cache().get(key).await {
            Some(Slot::Map(map)) => Ok(map.as_ref().clone()),
            Some(Slot::Value(_)) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn map_set(&self, key: &str, sub_key: &str, value: String) -> Result<()> {
        self.cache()
            .entry(key.to_owned())
            .and_try_compute_with(|entry| async move {
                let mut map = match entry.map(|e| e.into_value()) {
                    Some(Slot::Map(map)) => map.as_ref().clone(),
                    Some(Slot::Value(_)) => return Err(wrong_type(key)),
                    None => HashMap::new(),
                };
                map.insert(sub_key.to_owned(), value);
                Ok(Op::Put(Slot::Map(Arc::new(map))))
            })
            .await?;
        Ok(())
    }

    async fn map_set_all(&self, key: &str, entries: HashMap<String, String>, reset: bool) -> Result<()> {
        self.cache()
            .entry(key.to_owned())
            .and_try_compute_with(|entry| async move {
                let mut map = match entry.map(|e| e.into_value()) {
                    _ if reset => HashMap::new(),
                    Some(Slot::Map(map)) => map.as_ref().clone(),
                    Some(Slot::Value(_)) => return Err(wrong_type(key)),
                    None => HashMap::new(),
                };
                map.extend(entries);
                Ok(if map.is_empty() {
                    Op::Remove
                }
                else {
                    Op::Put(Slot::Map(Arc::new(map)))
                })
            })
            .await?;
        Ok(())
    }

    async fn map_delete(&self, key: &str, sub_key: &str) -> Result<bool> {
        let outcome = self
            .cache()
            .entry(key.to_owned())
            .and_try_compute_with(|entry| async move {
                let Some(slot) = entry.map(|e| e.into_value())
                else {
                    return Ok(Op::Nop);
                };
                let Slot::Map(map) = slot
                else {
                    return Err(wrong_type(key));
                };
                if !map.contains_key(sub_key) {
                    return Ok(Op::Nop);
                }
                let mut map = map.as_ref().clone();
                map.remove(sub_key);
                // Like Redis, an emptied hash disappears.
                Ok(if map.is_empty() {
                    Op::Remove
                }
                else {
                    Op::Put(Slot::Map(Arc::new(map)))
                })
            })
            .await?;
        Ok(matches!(outcome, CompResult::ReplacedWith(_) | CompResult::Removed(_)))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl: Duration) -> MemoryCache {
        MemoryCache::builder().ttl(ttl).build().unwrap()
    }

    fn entries(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn plain_values() {
        let cache = cache(Duration::from_secs(60));

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.add_if_absent("k", "v1".into()).await.unwrap());
        assert!(!cache.add_if_absent("k", "v2".into()).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v1"));

        cache.set("k", "v3".into()).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v3"));
        assert!(cache.exists("k").await.unwrap());

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn maps() {
        let cache = cache(Duration::from_secs(60));

        assert!(cache.map_get_all("h").await.unwrap().is_empty());
        cache.map_set("h", "a", "1".into()).await.unwrap();
        cache
            .map_set_all("h", entries(&[("b", "2"), ("c", "3")]), false)
            .await
            .unwrap();
        assert_eq!(cache.map_get_all("h").await.unwrap().len(), 3);
        assert_eq!(cache.map_get("h", "b").await.unwrap().as_deref(), Some("2"));

        cache.map_set_all("h", entries(&[("z", "26")]), true).await.unwrap();
        assert_eq!(cache.map_get_all("h").await.unwrap(), entries(&[("z", "26")]));

        assert!(cache.map_delete("h", "z").await.unwrap());
        assert!(!cache.map_delete("h", "z").await.unwrap());
        // The hash is gone along with its last field.
        assert!(!cache.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn type_mismatch_is_an_error() {
        let cache = cache(Duration::from_secs(60));
        cache.set("k", "v".into()).await.unwrap();
        assert!(cache.map_get("k", "a").await.unwrap_err().is_cache());
        assert!(cache.map_set("k", "a", "1".into()).await.unwrap_err().is_cache());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = cache(Duration::from_millis(100));
        cache.set("k", "v".into()).await.unwrap();
        cache.map_set("h", "a", "1".into()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.map_get_all("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_keeps_entries_alive() {
        let cache = cache(Duration::from_millis(200));
        cache.map_set("h", "a", "1".into()).await.unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cache.refresh_ttl("h").await.unwrap();
        }

        assert_eq!(cache.map_get("h", "a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let cache = cache(Duration::ZERO);
        cache.set("k", "v".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.exists("k").await.unwrap());
    }
}
