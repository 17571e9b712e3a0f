use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::MemoryCache;
use crate::error::Error;
use crate::error::Result;
use crate::traits::CacheBackend;

/// [`MemoryCache`] that can be switched into an "unreachable" state where every call fails with
/// [`Error::Cache`].
#[derive(Debug)]
pub struct FlakyCache {
    inner:   MemoryCache,
    failing: AtomicBool,
    calls:   AtomicUsize,
}

impl Default for FlakyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(600))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner:   MemoryCache::builder()
                .name("flaky".to_string())
                .ttl(ttl)
                .build()
                .expect("memory cache"),
            failing: AtomicBool::new(false),
            calls:   AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Drop every entry, as an external eviction would.
    pub fn evict_all(&self) {
        self.inner.clear();
    }

    fn gate(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::Cache("connection refused".into()))
        }
        else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.gate()?;
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gate()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.gate()?;
        self.inner.set(key, value).await
    }

    async fn add_if_absent(&self, key: &str, value: String) -> Result<bool> {
        self.gate()?;
        self.inner.add_if_absent(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.gate()?;
        self.inner.delete(key).await
    }

    async fn refresh_ttl(&self, key: &str) -> Result<()> {
        self.gate()?;
        self.inner.refresh_ttl(key).await
    }

    async fn map_get(&self, key: &str, sub_key: &str) -> Result<Option<String>> {
        self.gate()?;
        self.inner.map_get(key, sub_key).await
    }

    async fn map_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.gate()?;
        self.inner.map_get_all(key).await
    }

    async fn map_set(&self, key: &str, sub_key: &str, value: String) -> Result<()> {
        self.gate()?;
        self.inner.map_set(key, sub_key, value).await
    }

    async fn map_set_all(&self, key: &str, entries: HashMap<String, String>, reset: bool) -> Result<()> {
        self.gate()?;
        self.inner.map_set_all(key, entries, reset).await
    }

    async fn map_delete(&self, key: &str, sub_key: &str) -> Result<bool> {
        self.gate()?;
        self.inner.map_delete(key, sub_key).await
    }

    async fn ping(&self) -> Result<()> {
        self.gate()?;
        self.inner.ping().await
    }
}
