use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;

use crate::error::Result;
use crate::types::Value;

/// A domain entity persisted in one table of the backing store.
///
/// Property columns include the identifier columns: an update writes every property and locates the row by the
/// identifier values, an insert writes every property.
pub trait Record: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type name, also used as the cache key prefix.
    const TYPE_NAME: &'static str;

    fn id_names() -> &'static [&'static str];
    fn prop_names() -> &'static [&'static str];
    fn id_values(&self) -> Vec<Value>;
    fn prop_values(&self) -> Vec<Value>;
}

/// Key/value and key/hash-map store used as an accelerator.
///
/// Every method may fail with [`Error::Cache`](crate::error::Error::Cache) on connectivity problems. A missing key
/// is never an error. Writes that set a key apply the backend's TTL.
#[async_trait]
pub trait CacheBackend: Debug + Send + Sync + 'static {
    /// Liveness check. Backends with a TTL may treat it as a TTL refresh, making expiration slide on every check.
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    /// Returns `false` if the key was already present; the existing value is left intact.
    async fn add_if_absent(&self, key: &str, value: String) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn refresh_ttl(&self, key: &str) -> Result<()>;
    async fn map_get(&self, key: &str, sub_key: &str) -> Result<Option<String>>;
    /// Empty if the key is absent.
    async fn map_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn map_set(&self, key: &str, sub_key: &str, value: String) -> Result<()>;
    /// With `reset` the existing hash is dropped first, the replacement is atomic.
    async fn map_set_all(&self, key: &str, entries: HashMap<String, String>, reset: bool) -> Result<()>;
    async fn map_delete(&self, key: &str, sub_key: &str) -> Result<bool>;
    async fn ping(&self) -> Result<()>;
}

/// Durable relational store bound to the table of record type `R`.
///
/// Identifiers are always supplied by the caller, store-generated keys are not supported.
#[async_trait]
pub trait BackingStore<R: Record>: Debug + Send + Sync + 'static {
    async fn find_by_id(&self, ids: &[Value]) -> Result<Option<R>>;
    async fn find_all(&self) -> Result<Vec<R>>;
    async fn find_by_props(&self, names: &[String], values: &[Value]) -> Result<Vec<R>>;
    /// `predicate` is the condition part of the query only, without `WHERE`.
    async fn find_by_sql(&self, predicate: &str, values: &[Value]) -> Result<Vec<R>>;
    async fn delete_by_id(&self, ids: &[Value]) -> Result<u64>;
    async fn delete_by_props(&self, names: &[String], values: &[Value]) -> Result<u64>;
    async fn delete_by_sql(&self, predicate: &str, values: &[Value]) -> Result<u64>;
    /// Runs a complete statement. Returns the number of affected rows.
    async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64>;
    /// Returns `false` if no row matched the record's identifiers.
    async fn update(&self, record: &R) -> Result<bool>;
    async fn insert(&self, record: &R) -> Result<()>;
    /// All or nothing.
    async fn insert_batch(&self, records: &[R]) -> Result<()>;
}
