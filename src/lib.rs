//! # wb-data
//!
//! Cache-accelerated data access with per-entity ordered write-behind persistence.
//!
//! A relational database remains the source of truth, a key/value cache (Redis or in-process) sits in front of it.
//! Record types are registered per data source, either plain, going straight to the database, or cached in one of two
//! layouts:
//!
//! - **single**: one cache key per record, `"<Type>_<id>"`;
//! - **collection**: one cache hash per parent id, one hash field per child record. Think "inventory items of a
//!   player".
//!
//! Reads look into the cache first and repopulate it from the database on a miss. A missing or expired collection
//! hash is always reloaded in full, never built up piecemeal, so a present hash can be trusted to list every child.
//!
//! # Write-Behind
//!
//! With a [`WriteBehind`](write_behind::WriteBehind) coordinator updates and deletes of cached types are applied to the
//! cache before the call returns while the database write is queued on the [`OrderedExecutor`]. Queued updates of the
//! same record coalesce: only the latest state is written. Writes of one record are applied in submission order,
//! writes of different records run in parallel.
//!
//! ```ignore
//! let config = Config::from_args()?;
//! let db = config.connect_database().await?;
//!
//! let mut registry = DaoRegistry::new();
//! registry.add_source(1, Some(Arc::new(config.memory_cache()?)));
//! registry.register_cached(1, Player::layout(), Arc::new(SqlStore::<Player>::new(db.clone(), "player")))?;
//! registry.register_cached(1, Item::layout(), Arc::new(SqlStore::<Item>::new(db, "item")))?;
//!
//! let service = DataService::with_write_behind(registry, WriteBehind::new(config.executor()?));
//! service.update(1, "Player", r#"{"id":1,"gold":150}"#).await?;
//! let items = service.get_list(1, "Item", &1.into()).await?;
//!
//! service.shutdown().await;
//! ```

pub mod backend;
pub mod cached_dao;
pub mod config;
pub mod dao;
pub mod data;
pub mod error;
pub mod executor;
#[cfg(feature = "tracing")]
pub mod logging;
pub mod registry;
pub mod store;
pub mod traits;
pub mod types;
pub mod write_behind;

#[doc(inline)]
pub use cached_dao::CachedDao;
#[doc(inline)]
pub use data::DataService;
#[doc(inline)]
pub use error::Error;
#[doc(inline)]
pub use executor::OrderedExecutor;

pub mod prelude {
    pub use crate::backend::MemoryCache;
    #[cfg(feature = "redis")]
    pub use crate::backend::RedisCache;
    pub use crate::cached_dao::CachedDao;
    pub use crate::config::Config;
    pub use crate::dao::Dao;
    pub use crate::data::DataService;
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::executor::ExecutorParams;
    pub use crate::executor::OrderedExecutor;
    pub use crate::registry::DaoRegistry;
    pub use crate::registry::DataAccess;
    pub use crate::store::MemoryStore;
    pub use crate::store::SqlStore;
    pub use crate::traits::*;
    pub use crate::types::*;
    pub use crate::write_behind::WriteBehind;
    pub use crate::write_behind::WriteBehindStats;
}
