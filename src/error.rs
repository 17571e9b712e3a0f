use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the data access layer.
///
/// Absence of a record is never an error. Lookups return `Ok(None)` or an empty collection instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The cache backend is unreachable or timed out.
    #[error("cache backend error: {0}")]
    Cache(String),

    /// The backing store is unreachable or rejected the statement.
    #[error("backing store error: {0}")]
    Store(String),

    /// The operation is not allowed for the record type's cache topology.
    #[error("operation '{op}' is not supported for '{type_name}': {reason}")]
    Unsupported {
        type_name: &'static str,
        op:        &'static str,
        reason:    &'static str,
    },

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("data source {0} is not registered")]
    UnknownDataSource(i32),

    #[error("type '{type_name}' is not registered in data source {ds_id}")]
    UnknownType { ds_id: i32, type_name: String },

    #[error("type '{type_name}' is already registered in data source {ds_id}")]
    DuplicateType { ds_id: i32, type_name: &'static str },

    #[error("ordered executor is shut down")]
    ExecutorShutdown,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn unsupported(type_name: &'static str, op: &'static str, reason: &'static str) -> Self {
        Self::Unsupported { type_name, op, reason }
    }

    pub fn is_cache(&self) -> bool {
        matches!(self, Self::Cache(_))
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

impl From<sea_orm::DbErr> for Error {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<garde::Report> for Error {
    fn from(report: garde::Report) -> Self {
        Self::Config(report.to_string())
    }
}

impl From<clap::Error> for Error {
    fn from(err: clap::Error) -> Self {
        Self::Config(err.to_string())
    }
}
