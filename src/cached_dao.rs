//! Cache-backed data access for one record type.
//!
//! Reads consult the cache backend first and fall back to the backing store on a miss, repopulating the cache on the
//! way out. Writes go to the backing store synchronously; cache mutations on the write paths are best effort: a cache
//! error is logged and the operation carries on with the store alone.
//!
//! With [`Topology::Collection`] every cache write is preceded by [`check()`](CachedDao::check) which makes sure the
//! parent's hash is either absent or a complete copy of the store. Only deletes and the append path of
//! [`insert_batch()`](CachedDao::insert_batch) skip it: deleting from a missing hash is harmless and appending is
//! guarded by an explicit existence test.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::prelude::*;
use crate::write_behind::PendingWrites;

pub struct CachedDao<R: Record> {
    layout:  Layout<R>,
    cache:   Arc<dyn CacheBackend>,
    store:   Arc<dyn BackingStore<R>>,
    pending: Arc<PendingWrites<R>>,
}

impl<R: Record> CachedDao<R> {
    pub fn new(layout: Layout<R>, cache: Arc<dyn CacheBackend>, store: Arc<dyn BackingStore<R>>) -> Self {
        Self {
            layout,
            cache,
            store,
            pending: Arc::new(PendingWrites::default()),
        }
    }

    pub fn layout(&self) -> &Layout<R> {
        &self.layout
    }

    pub fn topology(&self) -> Topology {
        self.layout.topology()
    }

    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn BackingStore<R>> {
        &self.store
    }

    pub(crate) fn pending(&self) -> &PendingWrites<R> {
        &self.pending
    }

    /// Ordering key of the record's deferred writes.
    pub fn mark_key(&self, record: &R) -> String {
        self.layout.mark_key(record)
    }

    pub(crate) fn pending_key(&self, record: &R) -> PendingKey {
        self.layout.pending_key(record)
    }

    fn require(&self, topology: Topology, op: &'static str) -> Result<()> {
        if self.topology() == topology {
            Ok(())
        }
        else {
            Err(Error::unsupported(
                R::TYPE_NAME,
                op,
                match topology {
                    Topology::Single => "not available for collection cached types",
                    Topology::Collection => "not available for single cached types",
                },
            ))
        }
    }

    fn sub_key_of(&self, record: &R) -> String {
        self.layout.sub_key(record).unwrap_or_default()
    }

    // Swallow a cache error, leaving a trace of it.
    fn best_effort<T>(&self, op: &str, key: &str, outcome: Result<T>) -> Option<T> {
        outcome
            .inspect_err(|err| error!("[{}] cache error on {op} '{key}': {err}", R::TYPE_NAME))
            .ok()
    }

    // A cached entry that cannot be decoded is treated as a miss.
    fn decode_cached(&self, key: &str, data: &str) -> Option<R> {
        decode(data)
            .inspect_err(|err| warn!("[{}] dropping undecodable cache entry '{key}': {err}", R::TYPE_NAME))
            .ok()
    }

    fn encode_list(&self, records: &[R]) -> Result<HashMap<String, String>> {
        records
            .iter()
            .map(|r| Ok((self.sub_key_of(r), encode(r)?)))
            .collect()
    }

    // Loads every child of `id` and replaces the parent's hash with them. The cache is left untouched when the
    // store has no children.
    async fn reload_list(&self, id: &Value) -> Result<Vec<R>> {
        let Some(predicate) = self.layout.predicate()
        else {
            return Err(Error::unsupported(R::TYPE_NAME, "reload", "no list predicate configured"));
        };

        let records = self.store.find_by_sql(predicate, std::slice::from_ref(id)).await?;
        if !records.is_empty() {
            let key = self.layout.cache_key_for(id);
            debug!("[{}] loaded {} records from store, key={key}", R::TYPE_NAME, records.len());
            let entries = self.encode_list(&records)?;
            self.best_effort("map_set_all", &key, self.cache.map_set_all(&key, entries, true).await);
        }
        Ok(records)
    }

    /// Make sure the parent hash of `record` is either present or reloaded in full from the store. A no-op for single
    /// cached types.
    ///
    /// Cache errors are propagated: a caller that cannot tell whether the hash exists must not write into it.
    pub async fn check(&self, record: &R) -> Result<()> {
        if !self.layout.is_collection() {
            return Ok(());
        }

        let key = self.layout.cache_key(record);
        if !self.cache.exists(&key).await? {
            // Probably expired.
            self.reload_list(&self.layout.key_value(record)).await?;
        }
        Ok(())
    }

    // ---- Single topology reads ----

    pub async fn get(&self, id: &Value) -> Result<Option<R>> {
        self.require(Topology::Single, "get")?;

        let key = self.layout.cache_key_for(id);
        let cached = self.best_effort("get", &key, self.cache.get(&key).await).flatten();
        if let Some(record) = cached.and_then(|data| self.decode_cached(&key, &data)) {
            return Ok(Some(record));
        }

        let record = self.store.find_by_id(std::slice::from_ref(id)).await?;
        if let Some(ref record) = record {
            debug!("[{}] loaded from store, key={key}", R::TYPE_NAME);
            let data = encode(record)?;
            self.best_effort("set", &key, self.cache.set(&key, data).await);
        }
        Ok(record)
    }

    /// Always reads the store and overwrites the cached copy.
    pub async fn get_force_reload(&self, id: &Value) -> Result<Option<R>> {
        self.require(Topology::Single, "get_force_reload")?;

        let record = self.store.find_by_id(std::slice::from_ref(id)).await?;
        if let Some(ref record) = record {
            let key = self.layout.cache_key(record);
            debug!("[{}] forced load from store, key={key}", R::TYPE_NAME);
            let data = encode(record)?;
            self.best_effort("set", &key, self.cache.set(&key, data).await);
        }
        Ok(record)
    }

    // ---- Collection topology reads ----

    pub async fn get_list(&self, id: &Value) -> Result<Vec<R>> {
        self.require(Topology::Collection, "get_list")?;

        let key = self.layout.cache_key_for(id);
        let cached = self
            .best_effort("map_get_all", &key, self.cache.map_get_all(&key).await)
            .unwrap_or_default();

        if !cached.is_empty() {
            let records = cached
                .values()
                .map(|data| self.decode_cached(&key, data))
                .collect::<Option<Vec<_>>>();
            if let Some(records) = records {
                self.best_effort("refresh_ttl", &key, self.cache.refresh_ttl(&key).await);
                return Ok(records);
            }
        }

        self.reload_list(id).await
    }

    /// Always reads the store and replaces the cached hash.
    pub async fn get_list_force_reload(&self, id: &Value) -> Result<Vec<R>> {
        self.require(Topology::Collection, "get_list_force_reload")?;
        self.reload_list(id).await
    }

    /// One child of parent `id`.
    ///
    /// When the cache does not have it, `force_reload` reloads the whole hash from the store and answers from the fresh
    /// load. Without it the child is read from the store by its own identifier and the cache is left alone.
    pub async fn get_one(&self, id: &Value, sub_id: &Value, force_reload: bool) -> Result<Option<R>> {
        self.require(Topology::Collection, "get_one")?;

        let key = self.layout.cache_key_for(id);
        let sub_key = sub_id.to_string();

        let exists = self
            .best_effort("exists", &key, self.cache.exists(&key).await)
            .unwrap_or(false);
        if exists {
            let cached = self
                .best_effort("map_get", &key, self.cache.map_get(&key, &sub_key).await)
                .flatten();
            if let Some(record) = cached.and_then(|data| self.decode_cached(&key, &data)) {
                return Ok(Some(record));
            }
        }

        if force_reload {
            let records = self.reload_list(id).await?;
            Ok(records.into_iter().find(|r| self.sub_key_of(r) == sub_key))
        }
        else {
            let parent = id.to_string();
            let record = self.store.find_by_id(std::slice::from_ref(sub_id)).await?;
            Ok(record.filter(|r| self.layout.key_value(r).to_string() == parent))
        }
    }

    /// Restart the TTL of a collection's hash without reading it.
    pub async fn refresh_only(&self, id: &Value) -> Result<()> {
        self.require(Topology::Collection, "refresh_only")?;
        self.cache.refresh_ttl(&self.layout.cache_key_for(id)).await
    }

    // ---- Writes ----

    // Collection: check() then map_set(); skipped entirely if check() failed.
    async fn put_child(&self, record: &R, data: String) {
        let key = self.layout.cache_key(record);
        if self.best_effort("check", &key, self.check(record).await).is_some() {
            let sub_key = self.sub_key_of(record);
            self.best_effort("map_set", &key, self.cache.map_set(&key, &sub_key, data).await);
        }
    }

    pub async fn insert(&self, record: &R) -> Result<()> {
        self.store.insert(record).await?;

        let data = encode(record)?;
        match self.topology() {
            Topology::Single => {
                let key = self.layout.cache_key(record);
                // An insert never overwrites what is already cached.
                self.best_effort("add_if_absent", &key, self.cache.add_if_absent(&key, data).await);
            }
            Topology::Collection => self.put_child(record, data).await,
        }
        Ok(())
    }

    pub async fn insert_batch(&self, records: &[R]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.store.insert_batch(records).await?;

        match self.topology() {
            Topology::Single => {
                for record in records {
                    let key = self.layout.cache_key(record);
                    let data = encode(record)?;
                    self.best_effort("add_if_absent", &key, self.cache.add_if_absent(&key, data).await);
                }
            }
            Topology::Collection => {
                let mut groups: Vec<(String, Vec<&R>)> = Vec::new();
                for record in records {
                    let key = self.layout.cache_key(record);
                    match groups.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, group)) => group.push(record),
                        None => groups.push((key, vec![record])),
                    }
                }

                for (key, group) in groups {
                    let exists = self.best_effort("exists", &key, self.cache.exists(&key).await);
                    match exists {
                        Some(true) => {
                            let mut entries = HashMap::with_capacity(group.len());
                            for record in &group {
                                entries.insert(self.sub_key_of(record), encode(*record)?);
                            }
                            self.best_effort("map_set_all", &key, self.cache.map_set_all(&key, entries, false).await);
                        }
                        // A missing hash is reloaded in full rather than started from this batch.
                        Some(false) => {
                            let reloaded = self.reload_list(&self.layout.key_value(group[0])).await;
                            self.best_effort("reload", &key, reloaded);
                        }
                        None => (),
                    }
                }
            }
        }
        Ok(())
    }

    /// Synchronous update. The durable result is returned even if the cache could not be updated.
    pub async fn update(&self, record: &R) -> Result<bool> {
        let data = encode(record)?;
        match self.topology() {
            Topology::Single => {
                let key = self.layout.cache_key(record);
                self.best_effort("set", &key, self.cache.set(&key, data).await);
            }
            Topology::Collection => self.put_child(record, data).await,
        }
        self.store.update(record).await
    }

    /// Update of a collection child whose parent id changes from `old_id` to the one in `record`.
    pub async fn update_with_key(&self, record: &R, old_id: &Value) -> Result<bool> {
        self.require(Topology::Collection, "update_with_key")?;

        let data = encode(record)?;
        let old_key = self.layout.cache_key_for(old_id);
        let sub_key = self.sub_key_of(record);
        self.best_effort("map_delete", &old_key, self.cache.map_delete(&old_key, &sub_key).await);
        self.put_child(record, data).await;

        self.store.update(record).await
    }

    pub async fn delete(&self, record: &R) -> Result<u64> {
        let key = self.layout.cache_key(record);
        let outcome = self.cache_delete(record).await;
        self.best_effort("delete", &key, outcome);
        self.store.delete_by_id(&record.id_values()).await
    }

    // ---- Write-behind steps ----

    /// The synchronous half of a deferred update. Unlike [`update()`](Self::update) cache errors are returned.
    pub async fn cache_update(&self, record: &R) -> Result<bool> {
        let key = self.layout.cache_key(record);
        let data = encode(record)?;
        match self.topology() {
            Topology::Single => self.cache.set(&key, data).await?,
            Topology::Collection => {
                self.check(record).await?;
                self.cache.map_set(&key, &self.sub_key_of(record), data).await?;
            }
        }
        Ok(true)
    }

    /// Removes the record from the cache. Returns 1 if something was removed.
    pub async fn cache_delete(&self, record: &R) -> Result<u64> {
        let key = self.layout.cache_key(record);
        let removed = match self.topology() {
            Topology::Single => self.cache.delete(&key).await?,
            Topology::Collection => self.cache.map_delete(&key, &self.sub_key_of(record)).await?,
        };
        Ok(removed as u64)
    }

    pub async fn store_update(&self, record: &R) -> Result<bool> {
        self.store.update(record).await
    }

    pub async fn store_delete(&self, record: &R) -> Result<u64> {
        self.store.delete_by_id(&record.id_values()).await
    }

    // ---- Direct store access ----

    pub async fn find_by_id(&self, ids: &[Value]) -> Result<Option<R>> {
        self.store.find_by_id(ids).await
    }

    pub async fn find_all(&self) -> Result<Vec<R>> {
        self.store.find_all().await
    }

    pub async fn find_by_props(&self, names: &[String], values: &[Value]) -> Result<Vec<R>> {
        warn!("[{}] find_by_props bypasses the cache", R::TYPE_NAME);
        self.store.find_by_props(names, values).await
    }

    pub async fn find_by_sql(&self, predicate: &str, values: &[Value]) -> Result<Vec<R>> {
        self.store.find_by_sql(predicate, values).await
    }

    pub async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64> {
        let affected = self.store.execute(sql, values).await?;
        warn!("[{}] execute bypasses the cache, cached copies may be stale", R::TYPE_NAME);
        Ok(affected)
    }

    pub async fn delete_by_id(&self, _ids: &[Value]) -> Result<u64> {
        Err(Error::unsupported(
            R::TYPE_NAME,
            "delete_by_id",
            "would leave the cached copy behind, use delete",
        ))
    }

    pub async fn delete_by_props(&self, _names: &[String], _values: &[Value]) -> Result<u64> {
        Err(Error::unsupported(
            R::TYPE_NAME,
            "delete_by_props",
            "cannot invalidate the cache by properties",
        ))
    }

    pub async fn delete_by_sql(&self, _predicate: &str, _values: &[Value]) -> Result<u64> {
        Err(Error::unsupported(
            R::TYPE_NAME,
            "delete_by_sql",
            "cannot invalidate the cache by a raw predicate",
        ))
    }
}

impl<R: Record> Clone for CachedDao<R> {
    fn clone(&self) -> Self {
        Self {
            layout:  self.layout.clone(),
            cache:   Arc::clone(&self.cache),
            store:   Arc::clone(&self.store),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<R: Record> std::fmt::Debug for CachedDao<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedDao")
            .field("type", &R::TYPE_NAME)
            .field("layout", &self.layout)
            .field("cache", &self.cache)
            .field("store", &self.store)
            .finish()
    }
}
