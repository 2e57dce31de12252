//! Core types shared by the cache store and the cache layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Freshness of a cached entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheStatus {
  /// No row for the key
  NotPresent,
  /// Row refreshed within the TTL
  Current,
  /// Row older than the TTL
  Expired,
}

impl fmt::Display for CacheStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      CacheStatus::NotPresent => "not present",
      CacheStatus::Current => "current",
      CacheStatus::Expired => "expired",
    })
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was last refreshed (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the provider.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data from a cache row still within the TTL.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Expired cache row served because the refresh failed.
  pub fn stale(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Stale,
      cached_at: Some(cached_at),
    }
  }

  /// Data read from the bulk mirror.
  pub fn from_mirror(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Mirror,
      cached_at: None,
    }
  }
}

/// Indicates where resolved data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheSource {
  /// Fetched from the provider
  Network,
  /// Cache row within the TTL
  Cache,
  /// Expired cache row, provider unreachable
  Stale,
  /// Local bulk mirror
  Mirror,
}
