use std::ffi::OsString;
use std::time::Duration;

use clap::Parser;
use fieldx::fxstruct;
use garde::Validate;

use crate::backend::MemoryCache;
use crate::error::Error;
use crate::error::Result;
use crate::executor::ExecutorParams;
use crate::executor::OrderedExecutor;
use crate::executor::DEFAULT_BATCH_LIMIT;
use crate::executor::DEFAULT_LANES;

/// Data layer settings. Every option can also come from a `WBDATA_*` environment variable.
#[derive(Debug, Clone, clap::Parser, Validate)]
#[fxstruct(no_new, get(copy))]
#[clap(about, version, name = "wb-data")]
pub struct Config {
    /// Cache entry time-to-live in seconds. 0 disables expiration.
    #[clap(long, env = "WBDATA_CACHE_TTL", default_value_t = 3600)]
    #[garde(skip)]
    cache_ttl: u64,

    /// Maximum number of entries of the in-memory cache.
    #[clap(long, env = "WBDATA_CACHE_CAPACITY", default_value_t = 100_000)]
    #[garde(range(min = 1))]
    cache_capacity: u64,

    /// Whether an existence check restarts the TTL of the key.
    #[clap(long, env = "WBDATA_SLIDING_EXISTS", default_value_t = true, action = clap::ArgAction::Set)]
    #[garde(skip)]
    sliding_exists: bool,

    /// Number of write-behind executor lanes.
    #[clap(long, env = "WBDATA_LANES", default_value_t = DEFAULT_LANES)]
    #[garde(range(min = 1))]
    lanes: usize,

    /// Deferred writes run per lane activation, 0 for no limit.
    #[clap(long, env = "WBDATA_BATCH_LIMIT", default_value_t = DEFAULT_BATCH_LIMIT)]
    #[garde(skip)]
    batch_limit: usize,

    /// Lanes draining in parallel. Defaults to the number of CPUs.
    #[clap(long, env = "WBDATA_WORKERS")]
    #[garde(range(min = 1))]
    workers: Option<usize>,

    #[clap(long, env = "WBDATA_DATABASE_URL")]
    #[fieldx(get(copy(off)))]
    #[garde(skip)]
    database_url: Option<String>,

    #[clap(long, env = "WBDATA_REDIS_URL")]
    #[fieldx(get(copy(off)))]
    #[garde(skip)]
    redis_url: Option<String>,
}

impl Config {
    /// Parse the process command line and environment.
    pub fn from_args() -> Result<Self> {
        Self::try_parse_from(std::env::args_os())
    }

    pub fn try_parse_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = <Self as Parser>::try_parse_from(args)?;
        config.validate()?;
        Ok(config)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl())
    }

    pub fn executor_params(&self) -> Result<ExecutorParams> {
        ExecutorParams::builder()
            .name("write-behind".to_string())
            .lanes(self.lanes())
            .batch_limit(self.batch_limit())
            .workers(self.workers().unwrap_or_else(num_cpus::get))
            .build()
            .map_err(|err| Error::Config(err.to_string()))
    }

    /// Must be called within a tokio runtime.
    pub fn executor(&self) -> Result<OrderedExecutor> {
        OrderedExecutor::new(self.executor_params()?)
    }

    pub fn memory_cache(&self) -> Result<MemoryCache> {
        MemoryCache::builder()
            .ttl(self.ttl())
            .max_capacity(self.cache_capacity())
            .sliding_exists(self.sliding_exists())
            .build()
            .map_err(|err| Error::Config(err.to_string()))
    }

    #[cfg(feature = "redis")]
    pub async fn redis_cache(&self) -> Result<crate::backend::RedisCache> {
        let url = self
            .redis_url()
            .as_deref()
            .ok_or_else(|| Error::Config("redis URL is not set".into()))?;
        crate::backend::RedisCache::connect(url, self.ttl(), self.sliding_exists()).await
    }

    pub async fn connect_database(&self) -> Result<sea_orm::DatabaseConnection> {
        let url = self
            .database_url()
            .as_deref()
            .ok_or_else(|| Error::Config("database URL is not set".into()))?;
        Ok(sea_orm::Database::connect(url).await?)
    }
}
