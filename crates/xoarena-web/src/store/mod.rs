//! Shared store backends.

pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use xoarena_core::{KvStore, MemoryStore};

use crate::config::StoreConfig;

/// How often the in-process store drops expired keys.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub async fn connect(config: &StoreConfig) -> anyhow::Result<Arc<dyn KvStore>> {
    if config.is_memory() {
        tracing::warn!(
            "Using the in-process store. Limits and records are not shared between replicas."
        );
        let store = Arc::new(MemoryStore::new());
        spawn_purge_task(store.clone(), PURGE_INTERVAL);
        return Ok(store);
    }

    let url = config.connection_url()?;
    let store = redis_store::RedisStore::connect(&url).await?;
    Ok(Arc::new(store))
}

/// Periodically reclaims expired keys, which the in-process store otherwise
/// keeps until they are touched again.
pub fn spawn_purge_task(store: Arc<MemoryStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, remaining = store.len(), "purged expired keys");
            }
        }
    })
}
