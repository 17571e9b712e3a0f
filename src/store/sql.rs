use std::marker::PhantomData;

use async_trait::async_trait;
use sea_orm::ConnectionTrait;
use sea_orm::DatabaseBackend;
use sea_orm::DatabaseConnection;
use sea_orm::FromQueryResult;
use sea_orm::JsonValue;
use sea_orm::Statement;
use sea_orm::TransactionTrait;
use tracing::instrument;

use crate::prelude::*;

fn db_value(value: &Value) -> sea_orm::Value {
    match value {
        Value::Null => sea_orm::Value::String(None),
        Value::Bool(b) => sea_orm::Value::Bool(Some(*b)),
        Value::Int(i) => sea_orm::Value::BigInt(Some(*i)),
        Value::Float(f) => sea_orm::Value::Double(Some(*f)),
        Value::Text(s) => sea_orm::Value::String(Some(Box::new(s.clone()))),
    }
}

fn conditions(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

/// Rewrites `?` placeholders into the backend's syntax. Quoted literals are left alone.
fn placeholders(backend: DatabaseBackend, sql: &str) -> String {
    if backend != DatabaseBackend::Postgres {
        return sql.to_owned();
    }

    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut quoted = false;
    for c in sql.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                out.push(c);
            }
            '?' if !quoted => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug)]
struct Statements {
    select_all:   String,
    select_by_id: String,
    delete_by_id: String,
    update:       String,
    insert:       String,
}

/// Backing store bound to one database table.
///
/// Column names are those of [`Record::prop_names()`]. Rows are decoded through their JSON form, the record type
/// must therefore deserialize from a map of column names to values.
pub struct SqlStore<R: Record> {
    table:      String,
    connection: DatabaseConnection,
    sql:        Statements,
    _record:    PhantomData<fn() -> R>,
}

impl<R: Record> SqlStore<R> {
    pub fn new(connection: DatabaseConnection, table: impl Into<String>) -> Self {
        let table = table.into();
        let backend = connection.get_database_backend();
        let by_id = conditions(&names(R::id_names()));
        let columns = R::prop_names();

        let select_all = format!("SELECT * FROM {table}");
        let sql = Statements {
            select_by_id: placeholders(backend, &format!("{select_all} WHERE {by_id}")),
            delete_by_id: placeholders(backend, &format!("DELETE FROM {table} WHERE {by_id}")),
            update:       placeholders(
                backend,
                &format!(
                    "UPDATE {table} SET {} WHERE {by_id}",
                    columns
                        .iter()
                        .map(|c| format!("{c} = ?"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ),
            insert:       placeholders(
                backend,
                &format!(
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(", "),
                    vec!["?"; columns.len()].join(", ")
                ),
            ),
            select_all,
        };

        Self {
            table,
            connection,
            sql,
            _record: PhantomData,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    fn backend(&self) -> DatabaseBackend {
        self.connection.get_database_backend()
    }

    fn statement(&self, sql: &str, values: &[Value]) -> Statement {
        Statement::from_sql_and_values(self.backend(), sql, values.iter().map(db_value))
    }

    async fn query(&self, sql: &str, values: &[Value]) -> Result<Vec<R>> {
        let rows = self.connection.query_all(self.statement(sql, values)).await?;
        rows.iter()
            .map(|row| {
                let json = JsonValue::from_query_result(row, "")?;
                Ok(serde_json::from_value(json)?)
            })
            .collect()
    }

    async fn exec(&self, sql: &str, values: &[Value]) -> Result<u64> {
        Ok(self.connection.execute(self.statement(sql, values)).await?.rows_affected())
    }

    fn with_where(&self, verb: &str, predicate: &str) -> String {
        placeholders(self.backend(), &format!("{verb} {} WHERE {predicate}", self.table))
    }
}

impl<R: Record> std::fmt::Debug for SqlStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore")
            .field("type", &R::TYPE_NAME)
            .field("table", &self.table)
            .field("backend", &self.backend())
            .finish()
    }
}

#[async_trait]
impl<R: Record> BackingStore<R> for SqlStore<R> {
    #[instrument(level = "trace", skip(self))]
    async fn find_by_id(&self, ids: &[Value]) -> Result<Option<R>> {
        Ok(self.query(&self.sql.select_by_id, ids).await?.into_iter().next())
    }

    #[instrument(level = "trace", skip(self))]
    async fn find_all(&self) -> Result<Vec<R>> {
        self.query(&self.sql.select_all, &[]).await
    }

    #[instrument(level = "trace", skip(self))]
    async fn find_by_props(&self, names: &[String], values: &[Value]) -> Result<Vec<R>> {
        self.query(&self.with_where("SELECT * FROM", &conditions(names)), values)
            .await
    }

    #[instrument(level = "trace", skip(self))]
    async fn find_by_sql(&self, predicate: &str, values: &[Value]) -> Result<Vec<R>> {
        self.query(&self.with_where("SELECT * FROM", predicate), values).await
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete_by_id(&self, ids: &[Value]) -> Result<u64> {
        self.exec(&self.sql.delete_by_id, ids).await
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete_by_props(&self, names: &[String], values: &[Value]) -> Result<u64> {
        self.exec(&self.with_where("DELETE FROM", &conditions(names)), values)
            .await
    }

    #[instrument(level = "trace", skip(self))]
    async fn delete_by_sql(&self, predicate: &str, values: &[Value]) -> Result<u64> {
        self.exec(&self.with_where("DELETE FROM", predicate), values).await
    }

    #[instrument(level = "trace", skip(self))]
    async fn execute(&self, sql: &str, values: &[Value]) -> Result<u64> {
        self.exec(&placeholders(self.backend(), sql), values).await
    }

    #[instrument(level = "trace", skip(self))]
    async fn update(&self, record: &R) -> Result<bool> {
        let mut values = record.prop_values();
        values.extend(record.id_values());
        Ok(self.exec(&self.sql.update, &values).await? > 0)
    }

    #[instrument(level = "trace", skip(self))]
    async fn insert(&self, record: &R) -> Result<()> {
        self.exec(&self.sql.insert, &record.prop_values()).await?;
        Ok(())
    }

    #[instrument(level = "trace", skip(self, records), fields(count = records.len()))]
    async fn insert_batch(&self, records: &[R]) -> Result<()> {
        // Dropping an uncommitted transaction rolls it back.
        let txn = self.connection.begin().await?;
        for record in records {
            txn.execute(self.statement(&self.sql.insert, &record.prop_values()))
                .await?;
        }
        txn.commit().await?;
        Ok(())
    }
}
