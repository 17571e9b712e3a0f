//! Data source registry.
//!
//! Maps a data source id and a record type name to the type's data access object. Records cross this boundary in
//! their encoded form, the registered objects decode them into the concrete record type. The registry is filled at
//! startup and then handed to [`DataService`](crate::data::DataService).

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::prelude::*;

/// Type-erased data access over encoded records.
///
/// List results are encoded as a single array. Absence is `Ok(None)`.
#[async_trait]
pub trait DataAccess: Debug + Send + Sync + 'static {
    fn type_name(&self) -> &'static str;
    fn is_cached(&self) -> bool;

    async fn find_by_id(&self, ids: &[Value]) -> Result<Option<String>>;
    async fn find_all(&self) -> Result<String>;
    async fn find_by_props(&self, names: &[String], values: &[Value]) -> Result<String>;
    async fn find_by_sql(&self, predicate: &str, values: &[Value]) -> Result<String>;
    async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64>;
    async fn delete_by_id(&self, ids: &[Value]) -> Result<u64>;
    async fn delete_by_props(&self, names: &[String], values: &[Value]) -> Result<u64>;
    async fn delete_by_sql(&self, predicate: &str, values: &[Value]) -> Result<u64>;

    async fn insert(&self, data: &str) -> Result<()>;
    async fn insert_batch(&self, data: &[String]) -> Result<()>;
    /// With a coordinator the store write is deferred, otherwise it is synchronous.
    async fn update(&self, data: &str, write_behind: Option<&WriteBehind>) -> Result<bool>;
    async fn delete(&self, data: &str, write_behind: Option<&WriteBehind>) -> Result<u64>;
    async fn update_with_key(&self, data: &str, old_id: &Value) -> Result<bool>;

    async fn get(&self, id: &Value) -> Result<Option<String>>;
    async fn get_from_db(&self, id: &Value) -> Result<Option<String>>;
    async fn get_list(&self, id: &Value) -> Result<String>;
    async fn get_list_from_db(&self, id: &Value) -> Result<String>;
    async fn get_one(&self, id: &Value, sub_id: &Value, force_reload: bool) -> Result<Option<String>>;
    async fn list_delay(&self, id: &Value) -> Result<()>;
}

fn encode_opt<R: Record>(record: Option<R>) -> Result<Option<String>> {
    record.map(|r| encode(&r)).transpose()
}

fn decode_all<R: Record>(data: &[String]) -> Result<Vec<R>> {
    data.iter().map(|d| decode(d)).collect()
}

fn not_cached<T>(type_name: &'static str, op: &'static str) -> Result<T> {
    Err(Error::unsupported(type_name, op, "type is not cached"))
}

#[async_trait]
impl<R: Record> DataAccess for Dao<R> {
    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn is_cached(&self) -> bool {
        false
    }

    async fn find_by_id(&self, ids: &[Value]) -> Result<Option<String>> {
        encode_opt(Dao::find_by_id(self, ids).await?)
    }

    async fn find_all(&self) -> Result<String> {
        encode(&Dao::find_all(self).await?)
    }

    async fn find_by_props(&self, names: &[String], values: &[Value]) -> Result<String> {
        encode(&Dao::find_by_props(self, names, values).await?)
    }

    async fn find_by_sql(&self, predicate: &str, values: &[Value]) -> Result<String> {
        encode(&Dao::find_by_sql(self, predicate, values).await?)
    }

    async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64> {
        Dao::execute(self, sql, values).await
    }

    async fn delete_by_id(&self, ids: &[Value]) -> Result<u64> {
        Dao::delete_by_id(self, ids).await
    }

    async fn delete_by_props(&self, names: &[String], values: &[Value]) -> Result<u64> {
        Dao::delete_by_props(self, names, values).await
    }

    async fn delete_by_sql(&self, predicate: &str, values: &[Value]) -> Result<u64> {
        Dao::delete_by_sql(self, predicate, values).await
    }

    async fn insert(&self, data: &str) -> Result<()> {
        Dao::insert(self, &decode(data)?).await
    }

    async fn insert_batch(&self, data: &[String]) -> Result<()> {
        Dao::insert_batch(self, &decode_all::<R>(data)?).await
    }

    async fn update(&self, data: &str, _write_behind: Option<&WriteBehind>) -> Result<bool> {
        Dao::update(self, &decode(data)?).await
    }

    async fn delete(&self, data: &str, _write_behind: Option<&WriteBehind>) -> Result<u64> {
        Dao::delete(self, &decode(data)?).await
    }

    async fn update_with_key(&self, _data: &str, _old_id: &Value) -> Result<bool> {
        not_cached(R::TYPE_NAME, "update_with_key")
    }

    async fn get(&self, _id: &Value) -> Result<Option<String>> {
        not_cached(R::TYPE_NAME, "get")
    }

    async fn get_from_db(&self, _id: &Value) -> Result<Option<String>> {
        not_cached(R::TYPE_NAME, "get_from_db")
    }

    async fn get_list(&self, _id: &Value) -> Result<String> {
        not_cached(R::TYPE_NAME, "get_list")
    }

    async fn get_list_from_db(&self, _id: &Value) -> Result<String> {
        not_cached(R::TYPE_NAME, "get_list_from_db")
    }

    async fn get_one(&self, _id: &Value, _sub_id: &Value, _force_reload: bool) -> Result<Option<String>> {
        not_cached(R::TYPE_NAME, "get_one")
    }

    async fn list_delay(&self, _id: &Value) -> Result<()> {
        not_cached(R::TYPE_NAME, "list_delay")
    }
}

#[async_trait]
impl<R: Record> DataAccess for CachedDao<R> {
    fn type_name(&self) -> &'static str {
        R::TYPE_NAME
    }

    fn is_cached(&self) -> bool {
        true
    }

    async fn find_by_id(&self, ids: &[Value]) -> Result<Option<String>> {
        encode_opt(CachedDao::find_by_id(self, ids).await?)
    }

    async fn find_all(&self) -> Result<String> {
        encode(&CachedDao::find_all(self).await?)
    }

    async fn find_by_props(&self, names: &[String], values: &[Value]) -> Result<String> {
        encode(&CachedDao::find_by_props(self, names, values).await?)
    }

    async fn find_by_sql(&self, predicate: &str, values: &[Value]) -> Result<String> {
        encode(&CachedDao::find_by_sql(self, predicate, values).await?)
    }

    async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64> {
        CachedDao::execute(self, sql, values).await
    }

    async fn delete_by_id(&self, ids: &[Value]) -> Result<u64> {
        CachedDao::delete_by_id(self, ids).await
    }

    async fn delete_by_props(&self, names: &[String], values: &[Value]) -> Result<u64> {
        CachedDao::delete_by_props(self, names, values).await
    }

    async fn delete_by_sql(&self, predicate: &str, values: &[Value]) -> Result<u64> {
        CachedDao::delete_by_sql(self, predicate, values).await
    }

    async fn insert(&self, data: &str) -> Result<()> {
        CachedDao::insert(self, &decode(data)?).await
    }

    async fn insert_batch(&self, data: &[String]) -> Result<()> {
        CachedDao::insert_batch(self, &decode_all::<R>(data)?).await
    }

    async fn update(&self, data: &str, write_behind: Option<&WriteBehind>) -> Result<bool> {
        let record: R = decode(data)?;
        match write_behind {
            Some(write_behind) => write_behind.update(self, record).await,
            None => CachedDao::update(self, &record).await,
        }
    }

    async fn delete(&self, data: &str, write_behind: Option<&WriteBehind>) -> Result<u64> {
        let record: R = decode(data)?;
        match write_behind {
            Some(write_behind) => write_behind.delete(self, record).await,
            None => CachedDao::delete(self, &record).await,
        }
    }

    async fn update_with_key(&self, data: &str, old_id: &Value) -> Result<bool> {
        CachedDao::update_with_key(self, &decode(data)?, old_id).await
    }

    async fn get(&self, id: &Value) -> Result<Option<String>> {
        encode_opt(CachedDao::get(self, id).await?)
    }

    async fn get_from_db(&self, id: &Value) -> Result<Option<String>> {
        encode_opt(self.get_force_reload(id).await?)
    }

    async fn get_list(&self, id: &Value) -> Result<String> {
        encode(&CachedDao::get_list(self, id).await?)
    }

    async fn get_list_from_db(&self, id: &Value) -> Result<String> {
        encode(&self.get_list_force_reload(id).await?)
    }

    async fn get_one(&self, id: &Value, sub_id: &Value, force_reload: bool) -> Result<Option<String>> {
        encode_opt(CachedDao::get_one(self, id, sub_id, force_reload).await?)
    }

    async fn list_delay(&self, id: &Value) -> Result<()> {
        self.refresh_only(id).await
    }
}

/// One data source: a backing database with an optional cache in front of it.
#[derive(Debug)]
pub struct DataSource {
    id:    i32,
    cache: Option<Arc<dyn CacheBackend>>,
    types: HashMap<&'static str, Arc<dyn DataAccess>>,
}

impl DataSource {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.cache.as_ref()
    }

    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }
}

#[derive(Debug, Default)]
pub struct DaoRegistry {
    sources: HashMap<i32, DataSource>,
}

impl DaoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare data source `ds_id`. Declaring it again replaces its cache backend, registered types stay.
    pub fn add_source(&mut self, ds_id: i32, cache: Option<Arc<dyn CacheBackend>>) -> &mut Self {
        debug!("data source {ds_id}: cache {}", if cache.is_some() { "enabled" } else { "disabled" });
        self.sources
            .entry(ds_id)
            .and_modify(|source| source.cache = cache.clone())
            .or_insert_with(|| DataSource {
                id: ds_id,
                cache,
                types: HashMap::new(),
            });
        self
    }

    fn source_mut(&mut self, ds_id: i32) -> Result<&mut DataSource> {
        self.sources.get_mut(&ds_id).ok_or(Error::UnknownDataSource(ds_id))
    }

    /// Register a type-erased data access object.
    pub fn register(&mut self, ds_id: i32, access: Arc<dyn DataAccess>) -> Result<()> {
        let source = self.source_mut(ds_id)?;
        let type_name = access.type_name();
        if source.types.contains_key(type_name) {
            return Err(Error::DuplicateType { ds_id, type_name });
        }
        debug!(
            "data source {ds_id}: registered {}type '{type_name}'",
            if access.is_cached() { "cached " } else { "" }
        );
        source.types.insert(type_name, access);
        Ok(())
    }

    /// Register `R` without a cache.
    pub fn register_plain<R: Record>(&mut self, ds_id: i32, store: Arc<dyn BackingStore<R>>) -> Result<Dao<R>> {
        let dao = Dao::new(store);
        self.register(ds_id, Arc::new(dao.clone()))?;
        Ok(dao)
    }

    /// Register `R` behind the data source's cache backend.
    pub fn register_cached<R: Record>(
        &mut self,
        ds_id: i32,
        layout: Layout<R>,
        store: Arc<dyn BackingStore<R>>,
    ) -> Result<CachedDao<R>> {
        let cache = self
            .source_mut(ds_id)?
            .cache
            .clone()
            .ok_or_else(|| Error::Config(format!("data source {ds_id} has no cache backend for '{}'", R::TYPE_NAME)))?;
        let dao = CachedDao::new(layout, cache, store);
        self.register(ds_id, Arc::new(dao.clone()))?;
        Ok(dao)
    }

    pub fn source(&self, ds_id: i32) -> Result<&DataSource> {
        self.sources.get(&ds_id).ok_or(Error::UnknownDataSource(ds_id))
    }

    pub fn sources(&self) -> impl Iterator<Item = &DataSource> {
        self.sources.values()
    }

    pub fn get(&self, ds_id: i32, type_name: &str) -> Result<&Arc<dyn DataAccess>> {
        self.source(ds_id)?
            .types
            .get(type_name)
            .ok_or_else(|| Error::UnknownType {
                ds_id,
                type_name: type_name.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::Item;
    use crate::test::Player;

    fn cache() -> Arc<dyn CacheBackend> {
        Arc::new(MemoryCache::builder().build().unwrap())
    }

    #[test]
    fn lookups() {
        let mut registry = DaoRegistry::new();
        registry.add_source(1, Some(cache())).add_source(2, None);

        registry
            .register_cached(1, Player::layout(), Arc::new(MemoryStore::<Player>::new()))
            .unwrap();
        registry
            .register_plain::<Item>(2, Arc::new(MemoryStore::new()))
            .unwrap();

        assert!(registry.get(1, "Player").unwrap().is_cached());
        assert!(!registry.get(2, "Item").unwrap().is_cached());
        assert!(matches!(registry.get(1, "Item"), Err(Error::UnknownType { ds_id: 1, .. })));
        assert!(matches!(registry.get(3, "Item"), Err(Error::UnknownDataSource(3))));
    }

    #[test]
    fn registration_errors() {
        let mut registry = DaoRegistry::new();
        registry.add_source(1, None);

        assert!(matches!(
            registry.register_cached(1, Player::layout(), Arc::new(MemoryStore::<Player>::new())),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            registry.register_plain::<Player>(9, Arc::new(MemoryStore::new())),
            Err(Error::UnknownDataSource(9))
        ));

        registry
            .register_plain::<Player>(1, Arc::new(MemoryStore::new()))
            .unwrap();
        assert!(matches!(
            registry.register_plain::<Player>(1, Arc::new(MemoryStore::new())),
            Err(Error::DuplicateType {
                ds_id:     1,
                type_name: "Player",
            })
        ));
    }
}
