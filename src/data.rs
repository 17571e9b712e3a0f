//! The data service: every operation of every registered type, addressed by data source id and type name.
//!
//! The `find_*`, `execute` and `delete_by_*` operations always go to the backing store. Cached types reject the bulk
//! deletes and warn about the others. `get*` and `list_delay` are cache-backed reads available for cached types only.
//! `update` and `delete` of a cached type are deferred through the write-behind coordinator when the service has
//! one; inserts are always synchronous.

use std::sync::Arc;

use tracing::error;
use tracing::info;

use crate::prelude::*;

#[derive(Debug)]
pub struct DataService {
    registry:     Arc<DaoRegistry>,
    write_behind: Option<WriteBehind>,
}

impl DataService {
    /// Every write reaches the store before the call returns.
    pub fn synchronous(registry: DaoRegistry) -> Self {
        Self {
            registry:     Arc::new(registry),
            write_behind: None,
        }
    }

    /// Updates and deletes of cached types are persisted asynchronously.
    pub fn with_write_behind(registry: DaoRegistry, write_behind: WriteBehind) -> Self {
        Self {
            registry:     Arc::new(registry),
            write_behind: Some(write_behind),
        }
    }

    pub fn registry(&self) -> &DaoRegistry {
        &self.registry
    }

    pub fn write_behind(&self) -> Option<&WriteBehind> {
        self.write_behind.as_ref()
    }

    pub fn stats(&self) -> Option<WriteBehindStats> {
        self.write_behind.as_ref().map(|wb| wb.stats())
    }

    fn access(&self, ds_id: i32, type_name: &str) -> Result<&Arc<dyn DataAccess>> {
        self.registry.get(ds_id, type_name)
    }

    // ---- Backing store ----

    pub async fn find_by_id(&self, ds_id: i32, type_name: &str, ids: &[Value]) -> Result<Option<String>> {
        self.access(ds_id, type_name)?.find_by_id(ids).await
    }

    pub async fn find_all(&self, ds_id: i32, type_name: &str) -> Result<String> {
        self.access(ds_id, type_name)?.find_all().await
    }

    pub async fn find_by_prop(
        &self,
        ds_id: i32,
        type_name: &str,
        names: &[String],
        values: &[Value],
    ) -> Result<String> {
        self.access(ds_id, type_name)?.find_by_props(names, values).await
    }

    pub async fn find_by_sql(&self, ds_id: i32, type_name: &str, predicate: &str, values: &[Value]) -> Result<String> {
        self.access(ds_id, type_name)?.find_by_sql(predicate, values).await
    }

    pub async fn execute(&self, ds_id: i32, type_name: &str, sql: &str, values: &[Value]) -> Result<u64> {
        self.access(ds_id, type_name)?.execute(sql, values).await
    }

    pub async fn delete_by_id(&self, ds_id: i32, type_name: &str, ids: &[Value]) -> Result<u64> {
        self.access(ds_id, type_name)?.delete_by_id(ids).await
    }

    pub async fn delete_by_prop(
        &self,
        ds_id: i32,
        type_name: &str,
        names: &[String],
        values: &[Value],
    ) -> Result<u64> {
        self.access(ds_id, type_name)?.delete_by_props(names, values).await
    }

    pub async fn delete_by_sql(&self, ds_id: i32, type_name: &str, predicate: &str, values: &[Value]) -> Result<u64> {
        self.access(ds_id, type_name)?.delete_by_sql(predicate, values).await
    }

    // ---- Cache-backed reads ----

    pub async fn get(&self, ds_id: i32, type_name: &str, id: &Value) -> Result<Option<String>> {
        self.access(ds_id, type_name)?.get(id).await
    }

    pub async fn get_list(&self, ds_id: i32, type_name: &str, id: &Value) -> Result<String> {
        self.access(ds_id, type_name)?.get_list(id).await
    }

    pub async fn get_one(
        &self,
        ds_id: i32,
        type_name: &str,
        id: &Value,
        sub_id: &Value,
        force_reload: bool,
    ) -> Result<Option<String>> {
        self.access(ds_id, type_name)?
            .get_one(id, sub_id, force_reload)
            .await
    }

    pub async fn get_from_db(&self, ds_id: i32, type_name: &str, id: &Value) -> Result<Option<String>> {
        self.access(ds_id, type_name)?.get_from_db(id).await
    }

    pub async fn get_list_from_db(&self, ds_id: i32, type_name: &str, id: &Value) -> Result<String> {
        self.access(ds_id, type_name)?.get_list_from_db(id).await
    }

    pub async fn list_delay(&self, ds_id: i32, type_name: &str, id: &Value) -> Result<()> {
        self.access(ds_id, type_name)?.list_delay(id).await
    }

    // ---- Writes ----

    pub async fn update(&self, ds_id: i32, type_name: &str, data: &str) -> Result<bool> {
        self.access(ds_id, type_name)?
            .update(data, self.write_behind.as_ref())
            .await
    }

    pub async fn delete(&self, ds_id: i32, type_name: &str, data: &str) -> Result<u64> {
        self.access(ds_id, type_name)?
            .delete(data, self.write_behind.as_ref())
            .await
    }

    pub async fn insert(&self, ds_id: i32, type_name: &str, data: &str) -> Result<()> {
        self.access(ds_id, type_name)?.insert(data).await
    }

    pub async fn insert_batch(&self, ds_id: i32, type_name: &str, data: &[String]) -> Result<()> {
        self.access(ds_id, type_name)?.insert_batch(data).await
    }

    /// Synchronous update of a collection child whose parent id changes from `old_id`.
    pub async fn update_with_key(&self, ds_id: i32, type_name: &str, data: &str, old_id: &Value) -> Result<bool> {
        self.access(ds_id, type_name)?.update_with_key(data, old_id).await
    }

    // ---- Service ----

    /// `true` if every data source's cache backend responds.
    pub async fn patrol(&self) -> bool {
        let mut alive = true;
        for source in self.registry.sources() {
            if let Some(cache) = source.cache() {
                if let Err(err) = cache.ping().await {
                    error!("data source {}: cache backend is unreachable: {err}", source.id());
                    alive = false;
                }
            }
        }
        alive
    }

    /// Drain deferred writes. Writes arriving later are persisted synchronously.
    pub async fn shutdown(&self) {
        if let Some(write_behind) = &self.write_behind {
            info!("flushing deferred writes");
            write_behind.shutdown().await;
        }
    }
}
