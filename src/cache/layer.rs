//! Cache layer that orchestrates caching logic with network fetching.

use std::future::Future;
use tracing::{debug, warn};

use super::storage::CacheStore;
use super::traits::{CacheResult, CacheStatus};
use crate::error::ResolveError;
use crate::metadata::{Entity, EntityKey, EntityKind};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the orchestrator and the remote source,
/// serving expired rows when a refresh fails.
#[derive(Clone)]
pub struct CacheLayer {
  store: CacheStore,
}

impl CacheLayer {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Fetch a single entity with caching.
  ///
  /// 1. Current row: return it, the fetcher is never called
  /// 2. Expired row: fetch and update; on failure return the stale row
  /// 3. No row: fetch and insert; failures propagate
  pub async fn fetch_one<F, Fut>(
    &self,
    kind: EntityKind,
    key: &EntityKey,
    fetcher: F,
  ) -> Result<CacheResult<Entity>, ResolveError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Entity, ResolveError>>,
  {
    match self.store.status(kind, key)? {
      CacheStatus::Current => {
        debug!(entity = %kind, key = %key, "Cache hit");
        let cached = self.store.read(kind, key)?;
        Ok(CacheResult::from_cache(cached.entity, cached.last_updated))
      }
      CacheStatus::Expired => match fetcher().await {
        Ok(entity) => {
          self.store.write(&entity, true)?;
          Ok(CacheResult::from_network(entity))
        }
        Err(e) => {
          warn!(entity = %kind, key = %key, error = %e, "Refresh failed, serving stale cache entry");
          let cached = self.store.read(kind, key)?;
          Ok(CacheResult::stale(cached.entity, cached.last_updated))
        }
      },
      CacheStatus::NotPresent => {
        let entity = fetcher().await?;
        self.store.write(&entity, false)?;
        Ok(CacheResult::from_network(entity))
      }
    }
  }
}
