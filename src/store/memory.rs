use std::collections::BTreeMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::prelude::*;

// Unit separator; cannot appear in a sane identifier.
const KEY_SEP: char = '\u{1f}';

fn row_key(ids: &[Value]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(&KEY_SEP.to_string())
}

// Values compare by their textual form so that `Int(5)` matches `Text("5")`, as it would in SQL.
fn same_value(a: &Value, b: &Value) -> bool {
    a == b || (a != &Value::Null && b != &Value::Null && a.to_string() == b.to_string())
}

/// Parses `a = ? AND b = ?` into column names.
pub(crate) fn parse_predicate(predicate: &str) -> Result<Vec<String>> {
    let mut columns = Vec::new();
    let lowered = predicate.to_ascii_lowercase();
    let mut rest = lowered.as_str();
    let mut offset = 0;

    loop {
        let (part, next) = match rest.find(" and ") {
            Some(pos) => (&predicate[offset..offset + pos], Some(pos + 5)),
            None => (&predicate[offset..], None),
        };

        let Some((column, placeholder)) = part.split_once('=')
        else {
            return Err(Error::InvalidArgument(format!("unsupported predicate '{predicate}'")));
        };
        let column = column.trim().trim_matches(|c| c == '`' || c == '"');
        if column.is_empty() || placeholder.trim() != "?" {
            return Err(Error::InvalidArgument(format!("unsupported predicate '{predicate}'")));
        }
        columns.push(column.to_owned());

        match next {
            Some(skip) => {
                offset += skip;
                rest = &rest[skip..];
            }
            None => break,
        }
    }

    Ok(columns)
}

/// In-process backing store for record type `R`.
#[derive(Debug)]
pub struct MemoryStore<R: Record> {
    rows:    RwLock<BTreeMap<String, R>>,
    _record: PhantomData<R>,
}

impl<R: Record> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            rows:    RwLock::new(BTreeMap::new()),
            _record: PhantomData,
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let store = Self::new();
        for record in records {
            store.put(record);
        }
        store
    }

    /// Insert or replace a row.
    pub fn put(&self, record: R) {
        self.rows.write().insert(row_key(&record.id_values()), record);
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// All rows, ordered by the textual form of their identifiers.
    pub fn records(&self) -> Vec<R> {
        self.rows.read().values().cloned().collect()
    }

    fn column_positions(names: &[String]) -> Result<Vec<usize>> {
        let props = R::prop_names();
        names
            .iter()
            .map(|name| {
                props.iter().position(|p| p == name).ok_or_else(|| {
                    Error::InvalidArgument(format!("'{}' has no column named '{name}'", R::TYPE_NAME))
                })
            })
            .collect()
    }

    fn matcher(names: &[String], values: &[Value]) -> Result<impl Fn(&R) -> bool> {
        if names.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "{} columns but {} values given",
                names.len(),
                values.len()
            )));
        }
        let positions = Self::column_positions(names)?;
        let values = values.to_vec();
        Ok(move |record: &R| {
            let props = record.prop_values();
            positions
                .iter()
                .zip(values.iter())
                .all(|(&pos, value)| same_value(&props[pos], value))
        })
    }

    fn check_ids(ids: &[Value]) -> Result<()> {
        if ids.len() != R::id_names().len() {
            return Err(Error::InvalidArgument(format!(
                "'{}' is identified by {} values, {} given",
                R::TYPE_NAME,
                R::id_names().len(),
                ids.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Record> BackingStore<R> for MemoryStore<R> {
    async fn find_by_id(&self, ids: &[Value]) -> Result<Option<R>> {
        Self::check_ids(ids)?;
        Ok(self.rows.read().get(&row_key(ids)).cloned())
    }

    async fn find_all(&self) -> Result<Vec<R>> {
        Ok(self.records())
    }

    async fn find_by_props(&self, names: &[String], values: &[Value]) -> Result<Vec<R>> {
        let matches = Self::matcher(names, values)?;
        Ok(self.rows.read().values().filter(|r| matches(r)).cloned().collect())
    }

    async fn find_by_sql(&self, predicate: &str, values: &[Value]) -> Result<Vec<R>> {
        self.find_by_props(&parse_predicate(predicate)?, values).await
    }

    async fn delete_by_id(&self, ids: &[Value]) -> Result<u64> {
        Self::check_ids(ids)?;
        Ok(self.rows.write().remove(&row_key(ids)).map_or(0, |_| 1))
    }

    async fn delete_by_props(&self, names: &[String], values: &[Value]) -> Result<u64> {
        let matches = Self::matcher(names, values)?;
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|_, r| !matches(r));
        Ok((before - rows.len()) as u64)
    }

    async fn delete_by_sql(&self, predicate: &str, values: &[Value]) -> Result<u64> {
        self.delete_by_props(&parse_predicate(predicate)?, values).await
    }

    async fn execute(&self, _sql: &str, _values: &[Value]) -> Result<u64> {
        Err(Error::unsupported(R::TYPE_NAME, "execute", "raw statements need an SQL store"))
    }

    async fn update(&self, record: &R) -> Result<bool> {
        let mut rows = self.rows.write();
        match rows.get_mut(&row_key(&record.id_values())) {
            Some(row) => {
                *row = record.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert(&self, record: &R) -> Result<()> {
        let key = row_key(&record.id_values());
        let mut rows = self.rows.write();
        if rows.contains_key(&key) {
            return Err(Error::Store(format!("duplicate key '{key}' in '{}'", R::TYPE_NAME)));
        }
        rows.insert(key, record.clone());
        Ok(())
    }

    async fn insert_batch(&self, records: &[R]) -> Result<()> {
        let keys = records.iter().map(|r| row_key(&r.id_values())).collect::<Vec<_>>();
        let mut rows = self.rows.write();

        for (i, key) in keys.iter().enumerate() {
            if rows.contains_key(key) || keys[..i].contains(key) {
                return Err(Error::Store(format!("duplicate key '{key}' in '{}'", R::TYPE_NAME)));
            }
        }
        for (key, record) in keys.into_iter().zip(records) {
            rows.insert(key, record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::Item;

    #[test]
    fn predicates() {
        assert_eq!(parse_predicate("owner_id = ?").unwrap(), vec!["owner_id"]);
        assert_eq!(
            parse_predicate("`owner_id`=? AND item_id = ?").unwrap(),
            vec!["owner_id", "item_id"]
        );
        assert_eq!(parse_predicate("a = ? and b = ?").unwrap(), vec!["a", "b"]);
        assert!(parse_predicate("owner_id > ?").is_err());
        assert!(parse_predicate("owner_id = 5").is_err());
    }

    #[tokio::test]
    async fn crud() {
        let store = MemoryStore::<Item>::new();
        store.insert(&Item::new(5, 1, 10)).await.unwrap();
        store.insert(&Item::new(5, 2, 20)).await.unwrap();
        store.insert(&Item::new(6, 3, 30)).await.unwrap();

        assert!(store.insert(&Item::new(5, 1, 99)).await.unwrap_err().is_store());

        let owned = store.find_by_sql("owner_id = ?", &[5.into()]).await.unwrap();
        assert_eq!(owned.len(), 2);

        assert!(store.update(&Item::new(5, 2, 21)).await.unwrap());
        assert!(!store.update(&Item::new(5, 9, 1)).await.unwrap());
        assert_eq!(store.find_by_id(&[2.into()]).await.unwrap().unwrap().qty, 21);

        assert_eq!(store.delete_by_id(&[1.into()]).await.unwrap(), 1);
        assert_eq!(store.delete_by_id(&[1.into()]).await.unwrap(), 0);
        assert_eq!(store.delete_by_props(&["owner_id".into()], &[6.into()]).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = MemoryStore::with_records([Item::new(5, 1, 10)]);
        let batch = [Item::new(5, 2, 1), Item::new(5, 1, 1)];
        assert!(store.insert_batch(&batch).await.is_err());
        assert_eq!(store.len(), 1);

        store.insert_batch(&[Item::new(5, 2, 1), Item::new(5, 3, 1)]).await.unwrap();
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn wrong_id_arity() {
        let store = MemoryStore::<Item>::new();
        let err = store.find_by_id(&[1.into(), 2.into()]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
