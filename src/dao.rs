use std::sync::Arc;

use crate::prelude::*;

/// Data access for record types without a cache: every operation goes straight to the backing store.
pub struct Dao<R: Record> {
    store: Arc<dyn BackingStore<R>>,
}

impl<R: Record> Dao<R> {
    pub fn new(store: Arc<dyn BackingStore<R>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn BackingStore<R>> {
        &self.store
    }

    pub async fn find_by_id(&self, ids: &[Value]) -> Result<Option<R>> {
        self.store.find_by_id(ids).await
    }

    pub async fn find_all(&self) -> Result<Vec<R>> {
        self.store.find_all().await
    }

    pub async fn find_by_props(&self, names: &[String], values: &[Value]) -> Result<Vec<R>> {
        self.store.find_by_props(names, values).await
    }

    pub async fn find_by_sql(&self, predicate: &str, values: &[Value]) -> Result<Vec<R>> {
        self.store.find_by_sql(predicate, values).await
    }

    pub async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64> {
        self.store.execute(sql, values).await
    }

    pub async fn delete_by_id(&self, ids: &[Value]) -> Result<u64> {
        self.store.delete_by_id(ids).await
    }

    pub async fn delete_by_props(&self, names: &[String], values: &[Value]) -> Result<u64> {
        self.store.delete_by_props(names, values).await
    }

    pub async fn delete_by_sql(&self, predicate: &str, values: &[Value]) -> Result<u64> {
        self.store.delete_by_sql(predicate, values).await
    }

    pub async fn update(&self, record: &R) -> Result<bool> {
        self.store.update(record).await
    }

    pub async fn delete(&self, record: &R) -> Result<u64> {
        self.store.delete_by_id(&record.id_values()).await
    }

    pub async fn insert(&self, record: &R) -> Result<()> {
        self.store.insert(record).await
    }

    pub async fn insert_batch(&self, records: &[R]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.store.insert_batch(records).await
    }
}

impl<R: Record> Clone for Dao<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<R: Record> std::fmt::Debug for Dao<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dao")
            .field("type", &R::TYPE_NAME)
            .field("store", &self.store)
            .finish()
    }
}
