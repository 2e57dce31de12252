//! Cached provider client: resolves entities through the local cache, the
//! provider, or the bulk mirror.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheLayer, CacheResult, CacheStatus, CacheStore};
use crate::config::Config;
use crate::db::Database;
use crate::error::ResolveError;
use crate::filter::request_body;
use crate::metadata::api::entity_from_api;
use crate::metadata::{Entity, EntityKey, EntityKind};
use crate::mirror::Mirror;

use super::client::{IgdbClient, RemoteSource};
use super::limiter::RateLimiter;

/// Provider client with transparent caching support.
///
/// Fresh cache rows are served without touching the provider; expired rows
/// are refreshed and served as-is if the refresh fails. With a bulk mirror
/// configured, every lookup goes to the mirror instead.
pub struct MetadataClient<R = IgdbClient> {
  remote: Arc<R>,
  limiter: Arc<RateLimiter>,
  cache: CacheLayer,
  mirror: Option<Mirror>,
}

impl MetadataClient<IgdbClient> {
  /// Create a client from configuration.
  pub fn new(config: &Config) -> Result<Self> {
    let db = Database::open(config.cache.path.as_deref())?;
    let store = CacheStore::new(db.clone(), config.provider.table_prefix.as_str())
      .map_err(|e| eyre!("Failed to prepare cache tables: {}", e))?;

    let mirror = if config.mirror.enabled {
      let path = config
        .mirror
        .path
        .as_deref()
        .ok_or_else(|| eyre!("mirror.enabled is set but mirror.path is missing"))?;
      let mirror = Mirror::attach(db, path, &config.mirror.schema)
        .map_err(|e| eyre!("Failed to attach mirror {}: {}", path.display(), e))?;
      Some(mirror)
    } else {
      None
    };

    // Mirror mode never calls the provider, so a token is optional there
    let token = match Config::get_access_token() {
      Ok(token) => token,
      Err(e) if mirror.is_some() => {
        debug!(error = %e, "No access token, continuing in mirror mode");
        String::new()
      }
      Err(e) => return Err(e),
    };
    let remote = IgdbClient::with_token(&config.provider, token)?;
    let limiter = RateLimiter::new(
      config.provider.table_prefix.as_str(),
      config.provider.rate_limit,
    );

    Ok(Self::with_parts(remote, limiter, CacheLayer::new(store), mirror))
  }
}

impl<R: RemoteSource> MetadataClient<R> {
  pub fn with_parts(
    remote: R,
    limiter: RateLimiter,
    cache: CacheLayer,
    mirror: Option<Mirror>,
  ) -> Self {
    Self {
      remote: Arc::new(remote),
      limiter: Arc::new(limiter),
      cache,
      mirror,
    }
  }

  pub fn mirror(&self) -> Option<&Mirror> {
    self.mirror.as_ref()
  }

  /// Resolve an entity by id or slug.
  pub async fn resolve(&self, kind: EntityKind, key: &EntityKey) -> Result<Entity, ResolveError> {
    Ok(self.resolve_with_source(kind, key).await?.data)
  }

  /// Resolve an entity, reporting where it came from.
  pub async fn resolve_with_source(
    &self,
    kind: EntityKind,
    key: &EntityKey,
  ) -> Result<CacheResult<Entity>, ResolveError> {
    if matches!(key, EntityKey::Slug(_)) && !kind.descriptor().supports_slug {
      return Err(ResolveError::SlugNotSupported(kind));
    }

    if let Some(mirror) = &self.mirror {
      return mirror.find(kind, key).map(CacheResult::from_mirror);
    }

    self
      .cache
      .fetch_one(kind, key, || self.fetch_remote(kind, key))
      .await
  }

  /// Resolve several keys of one type concurrently.
  pub async fn resolve_many(
    &self,
    kind: EntityKind,
    keys: &[EntityKey],
  ) -> Vec<Result<Entity, ResolveError>> {
    join_all(keys.iter().map(|key| self.resolve(kind, key))).await
  }

  /// Cache freshness for a key. The mirror is not consulted.
  pub fn status(&self, kind: EntityKind, key: &EntityKey) -> Result<CacheStatus, ResolveError> {
    if matches!(key, EntityKey::Slug(_)) && !kind.descriptor().supports_slug {
      return Err(ResolveError::SlugNotSupported(kind));
    }
    Ok(self.cache.store().status(kind, key)?)
  }

  async fn fetch_remote(&self, kind: EntityKind, key: &EntityKey) -> Result<Entity, ResolveError> {
    let endpoint = kind.descriptor().table_name;
    let body = request_body("*", &format!("{}; limit 1", key.filter()));

    let records = self
      .limiter
      .execute(endpoint, || self.remote.query(endpoint, &body))
      .await?;

    let record = records.first().ok_or_else(|| ResolveError::NotFound {
      kind,
      key: key.to_string(),
    })?;
    let entity = entity_from_api(kind, record)?;

    info!(entity = %kind, key = %key, id = entity.id(), "Fetched from provider");
    Ok(entity)
  }
}

impl<R> Clone for MetadataClient<R> {
  fn clone(&self) -> Self {
    Self {
      remote: Arc::clone(&self.remote),
      limiter: Arc::clone(&self.limiter),
      cache: self.cache.clone(),
      mirror: self.mirror.clone(),
    }
  }
}
