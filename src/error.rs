//! Error types for metadata operations.

use thiserror::Error;

use crate::metadata::EntityKind;

/// Failures compiling a filter expression into SQL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
  #[error("malformed condition '{0}': expected <column> <operator> <value>")]
  MalformedCondition(String),

  #[error("unsupported operator '{operator}' in condition '{condition}'")]
  UnsupportedOperator { operator: String, condition: String },

  #[error("invalid limit '{0}': expected a positive integer")]
  InvalidLimit(String),

  #[error("search clause requires the field list to include 'name' or '*'")]
  SearchRequiresNameField,

  #[error("invalid field list '{0}'")]
  InvalidFields(String),

  #[error("query for {0} compiled to an empty statement")]
  EmptyQuery(EntityKind),
}

/// A single field could not be converted. Recovered locally by the mapper.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MappingError {
  #[error("{kind}.{field}: expected {expected}, got {found}")]
  TypeMismatch {
    kind: EntityKind,
    field: String,
    expected: &'static str,
    found: String,
  },

  #[error("{kind} has no field '{field}'")]
  UnknownField { kind: EntityKind, field: String },

  #[error("{kind} payload has no usable id")]
  MissingId { kind: EntityKind },
}

/// Failures talking to the remote provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
  #[error("{endpoint}: rate limited by provider (HTTP 429)")]
  RateLimited { endpoint: String },

  #[error("{endpoint}: request failed with status {status}: {message}")]
  Status {
    endpoint: String,
    status: u16,
    message: String,
  },

  #[error("{endpoint}: request failed: {message}")]
  Transport { endpoint: String, message: String },

  #[error("{endpoint}: invalid response: {message}")]
  InvalidResponse { endpoint: String, message: String },
}

impl RemoteError {
  pub fn is_rate_limited(&self) -> bool {
    matches!(self, RemoteError::RateLimited { .. })
  }
}

/// Local store failures.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("{kind} with {field} = '{value}' not found")]
  NotFound {
    kind: EntityKind,
    field: String,
    value: String,
  },

  #[error("{kind} has no column '{column}'")]
  UnknownColumn { kind: EntityKind, column: String },

  #[error("invalid timestamp '{0}' in cache row")]
  InvalidTimestamp(String),

  #[error("invalid schema name '{0}'")]
  InvalidSchema(String),

  #[error("database lock poisoned")]
  LockPoisoned,

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),
}

/// Failures resolving an entity through the cache, the mirror or the provider.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  Compile(#[from] CompileError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error(transparent)]
  Mapping(#[from] MappingError),

  #[error("{kind} '{key}' not found")]
  NotFound { kind: EntityKind, key: String },

  #[error("{0} cannot be looked up by slug")]
  SlugNotSupported(EntityKind),

  #[error("bulk mirror is not configured")]
  MirrorUnavailable,
}
