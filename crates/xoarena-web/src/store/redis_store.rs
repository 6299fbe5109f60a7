//! Redis-backed store.
//!
//! Every primitive maps onto one Redis command over a shared
//! `ConnectionManager`, which reconnects on its own after failures.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use xoarena_core::{CoreError, CoreResult, KvStore};

pub struct RedisStore {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

fn store_err(command: &str, e: RedisError) -> CoreError {
    CoreError::Store(format!("{command}: {e}"))
}

impl RedisStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        let mut conn = connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        tracing::info!("Connected to shared store");

        Ok(Self { connection })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> CoreResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| store_err("ZADD", e))?;
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> CoreResult<u64> {
        let mut conn = self.connection.clone();
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async::<u64>(&mut conn)
            .await
            .map_err(|e| store_err("ZREMRANGEBYSCORE", e))
    }

    async fn zcard(&self, key: &str) -> CoreResult<u64> {
        let mut conn = self.connection.clone();
        redis::cmd("ZCARD")
            .arg(key)
            .query_async::<u64>(&mut conn)
            .await
            .map_err(|e| store_err("ZCARD", e))
    }

    async fn expire(&self, key: &str, seconds: u64) -> CoreResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| store_err("EXPIRE", e))?;
        Ok(())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> CoreResult<i64> {
        let mut conn = self.connection.clone();
        redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(delta)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| store_err("HINCRBY", e))
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> CoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        cmd.query_async::<i64>(&mut conn)
            .await
            .map_err(|e| store_err("HSET", e))?;
        Ok(())
    }

    async fn zincr_by(&self, key: &str, member: &str, delta: f64) -> CoreResult<f64> {
        let mut conn = self.connection.clone();
        redis::cmd("ZINCRBY")
            .arg(key)
            .arg(delta)
            .arg(member)
            .query_async::<f64>(&mut conn)
            .await
            .map_err(|e| store_err("ZINCRBY", e))
    }

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> CoreResult<Vec<(String, f64)>> {
        let mut conn = self.connection.clone();
        redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async::<Vec<(String, f64)>>(&mut conn)
            .await
            .map_err(|e| store_err("ZREVRANGE", e))
    }

    async fn hgetall(&self, key: &str) -> CoreResult<HashMap<String, String>> {
        let mut conn = self.connection.clone();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async::<HashMap<String, String>>(&mut conn)
            .await
            .map_err(|e| store_err("HGETALL", e))
    }
}
