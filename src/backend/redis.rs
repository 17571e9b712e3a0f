use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Cmd;
use tracing::info;

use crate::error::Result;
use crate::traits::CacheBackend;

/// Redis cache backend. Hash keys map to Redis hashes, plain keys to strings.
#[derive(Clone)]
pub struct RedisCache {
    url:            String,
    conn:           ConnectionManager,
    // Seconds, zero disables expiration.
    ttl:            u64,
    sliding_exists: bool,
}

impl RedisCache {
    pub async fn connect(url: &str, ttl: Duration, sliding_exists: bool) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to redis at {url}, ttl {}s", ttl.as_secs());

        Ok(Self {
            url: url.to_owned(),
            conn,
            ttl: ttl.as_secs(),
            sliding_exists,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        Ok(cmd.query_async(&mut conn).await?)
    }

    fn expire_cmd(&self, key: &str) -> Cmd {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(self.ttl);
        cmd
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("url", &self.url)
            .field("ttl", &self.ttl)
            .field("sliding_exists", &self.sliding_exists)
            .finish()
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        let found: i64 = if self.sliding_exists && self.ttl > 0 {
            // EXPIRE answers 1 only for an existing key, so the probe doubles as a TTL refresh.
            self.query(&self.expire_cmd(key)).await?
        }
        else {
            self.query(redis::cmd("EXISTS").arg(key)).await?
        };
        Ok(found > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if self.ttl > 0 {
            cmd.arg("EX").arg(self.ttl);
        }
        self.query::<()>(&cmd).await
    }

    async fn add_if_absent(&self, key: &str, value: String) -> Result<bool> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if self.ttl > 0 {
            cmd.arg("EX").arg(self.ttl);
        }
        let reply: Option<String> = self.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn refresh_ttl(&self, key: &str) -> Result<()> {
        if self.ttl > 0 {
            self.query::<i64>(&self.expire_cmd(key)).await?;
        }
        Ok(())
    }

    async fn map_get(&self, key: &str, sub_key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("HGET").arg(key).arg(sub_key)).await
    }

    async fn map_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.query(redis::cmd("HGETALL").arg(key)).await
    }

    async fn map_set(&self, key: &str, sub_key: &str, value: String) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key).arg(sub_key).arg(value).ignore();
        if self.ttl > 0 {
            pipe.add_command(self.expire_cmd(key)).ignore();
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn map_set_all(&self, key: &str, entries: HashMap<String, String>, reset: bool) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        if reset {
            pipe.cmd("DEL").arg(key).ignore();
        }
        if !entries.is_empty() {
            let mut hset = redis::cmd("HSET");
            hset.arg(key);
            for (sub_key, value) in entries {
                hset.arg(sub_key).arg(value);
            }
            pipe.add_command(hset).ignore();
            if self.ttl > 0 {
                pipe.add_command(self.expire_cmd(key)).ignore();
            }
        }
        else if !reset {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn map_delete(&self, key: &str, sub_key: &str) -> Result<bool> {
        let removed: i64 = self.query(redis::cmd("HDEL").arg(key).arg(sub_key)).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        self.query::<String>(&redis::cmd("PING")).await?;
        Ok(())
    }
}
