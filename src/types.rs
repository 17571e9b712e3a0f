use std::fmt::Debug;
use std::fmt::Display;
use std::hash::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::traits::Record;

/// Identity of a record among deferred writes: its cache key and, for collections, its sub-key. Distinct records never
/// share it, even when their mark keys coincide.
pub type PendingKey = (String, Option<String>);

/// A scalar column value: identifier parts, property values, and statement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

macro_rules! value_from {
    ($variant:ident: $( $ty:ty ),+ ) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

value_from!(Int: i64, i32, i16, u32, u16, u8);
value_from!(Float: f64, f32);
value_from!(Text: String, &str);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// How a record type is laid out in the cache backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// One cache key per record.
    Single,
    /// One cache hash per parent id, one hash field per child.
    Collection,
}

/// Per-type cache layout: the accessors extracting the cache key and sub key from a record, and, for collections,
/// the predicate loading every child of a parent id. Constructed once at registration time.
pub struct Layout<R> {
    key:       fn(&R) -> Value,
    sub_key:   Option<fn(&R) -> Value>,
    predicate: Option<String>,
}

impl<R: Record> Layout<R> {
    pub fn single(key: fn(&R) -> Value) -> Self {
        Self {
            key,
            sub_key: None,
            predicate: None,
        }
    }

    /// `predicate` is the condition part of a query taking the parent id as its only parameter, e.g.
    /// `"owner_id = ?"`.
    pub fn collection(key: fn(&R) -> Value, sub_key: fn(&R) -> Value, predicate: impl Into<String>) -> Self {
        Self {
            key,
            sub_key: Some(sub_key),
            predicate: Some(predicate.into()),
        }
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        if self.sub_key.is_some() {
            Topology::Collection
        }
        else {
            Topology::Single
        }
    }

    #[inline]
    pub fn is_collection(&self) -> bool {
        self.topology() == Topology::Collection
    }

    pub fn predicate(&self) -> Option<&str> {
        self.predicate.as_deref()
    }

    /// The value of the field the cache key is derived from: the record id, or the parent id for collections.
    pub fn key_value(&self, record: &R) -> Value {
        (self.key)(record)
    }

    pub fn cache_key(&self, record: &R) -> String {
        self.cache_key_for(&self.key_value(record))
    }

    pub fn cache_key_for(&self, id: &Value) -> String {
        format!("{}_{}", R::TYPE_NAME, id)
    }

    pub fn sub_key(&self, record: &R) -> Option<String> {
        self.sub_key.map(|sub_key| sub_key(record).to_string())
    }

    /// Ordering key of the record's durable writes. Writes sharing it are applied in submission order.
    pub fn mark_key(&self, record: &R) -> String {
        let mut mark_key = self.cache_key(record);
        if let Some(sub_key) = self.sub_key(record) {
            mark_key.push_str(&sub_key);
        }
        mark_key
    }

    pub fn pending_key(&self, record: &R) -> PendingKey {
        (self.cache_key(record), self.sub_key(record))
    }

    pub fn mark_key_for(&self, id: &Value, sub_id: Option<&Value>) -> String {
        let mut mark_key = self.cache_key_for(id);
        if self.is_collection() {
            if let Some(sub_id) = sub_id {
                mark_key.push_str(&sub_id.to_string());
            }
        }
        mark_key
    }
}

impl<R> Clone for Layout<R> {
    fn clone(&self) -> Self {
        Self {
            key:       self.key,
            sub_key:   self.sub_key,
            predicate: self.predicate.clone(),
        }
    }
}

impl<R> Debug for Layout<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layout")
            .field("collection", &self.sub_key.is_some())
            .field("predicate", &self.predicate)
            .finish()
    }
}

/// Numeric ordering key of a mark key, as consumed by
/// [`OrderedExecutor::submit()`](crate::executor::OrderedExecutor::submit).
pub fn ordering_key(mark_key: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    mark_key.hash(&mut hasher);
    hasher.finish() as i64
}

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn decode<T: DeserializeOwned>(data: &str) -> Result<T> {
    Ok(serde_json::from_str(data)?)
}
