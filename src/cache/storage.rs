//! SQLite cache store: one table per entity type, keyed by provider id.

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use super::mapper::{dry, hydrate, WriteMode};
use super::traits::CacheStatus;
use crate::db::schema::{cache_schema, DATE_ADDED, LAST_UPDATED};
use crate::db::{parse_datetime, query_rows, sql_from_json, Database, Row};
use crate::error::StoreError;
use crate::filter::is_identifier;
use crate::metadata::{Entity, EntityKey, EntityKind};

/// Cached rows older than this are `Expired`.
pub const CACHE_TTL_HOURS: i64 = 168;

/// A single cached entity.
#[derive(Debug, Clone)]
pub struct CachedEntity {
  pub entity: Entity,
  /// When the row was first written
  pub date_added: DateTime<Utc>,
  /// When the row was last refreshed from the provider
  pub last_updated: DateTime<Utc>,
}

/// Per-source cache tables named `<prefix>_<EntityType>`.
#[derive(Clone)]
pub struct CacheStore {
  db: Database,
  prefix: String,
}

impl CacheStore {
  /// Create the cache tables for `prefix` if they don't exist yet.
  pub fn new(db: Database, prefix: impl Into<String>) -> Result<Self, StoreError> {
    let prefix = prefix.into();
    if !is_identifier(&prefix) || prefix.contains('.') {
      return Err(StoreError::InvalidSchema(prefix));
    }

    db.lock()?.execute_batch(&cache_schema(&prefix))?;

    Ok(Self { db, prefix })
  }

  pub(crate) fn db(&self) -> &Database {
    &self.db
  }

  fn table(&self, kind: EntityKind) -> String {
    kind.descriptor().cache_table(&self.prefix)
  }

  /// Freshness of the cached row for `key`.
  pub fn status(&self, kind: EntityKind, key: &EntityKey) -> Result<CacheStatus, StoreError> {
    self.status_at(kind, key, Utc::now())
  }

  /// Freshness of the cached row for `key` as seen at `now`.
  pub fn status_at(
    &self,
    kind: EntityKind,
    key: &EntityKey,
    now: DateTime<Utc>,
  ) -> Result<CacheStatus, StoreError> {
    let column = checked_column(kind, key.column())?;
    let conn = self.db.lock()?;

    let sql = format!(
      "SELECT \"{}\" FROM \"{}\" WHERE \"{}\" = ?1 LIMIT 1",
      LAST_UPDATED,
      self.table(kind),
      column
    );
    let last_updated: Option<String> = conn
      .query_row(&sql, [key_value(key)], |row| row.get(0))
      .optional()?;

    let Some(last_updated) = last_updated else {
      return Ok(CacheStatus::NotPresent);
    };

    if parse_datetime(&last_updated)? < now - Duration::hours(CACHE_TTL_HOURS) {
      Ok(CacheStatus::Expired)
    } else {
      Ok(CacheStatus::Current)
    }
  }

  /// Read the cached entity for `key`.
  pub fn read(&self, kind: EntityKind, key: &EntityKey) -> Result<CachedEntity, StoreError> {
    let value = match key {
      EntityKey::Id(id) => Value::from(*id),
      EntityKey::Slug(slug) => Value::String(slug.clone()),
    };
    self.read_by(kind, key.column(), &value)
  }

  /// Read the first cached entity whose `field` equals `value`.
  pub fn read_by(
    &self,
    kind: EntityKind,
    field: &str,
    value: &Value,
  ) -> Result<CachedEntity, StoreError> {
    let column = checked_column(kind, field)?;
    let conn = self.db.lock()?;

    let sql = format!(
      "SELECT * FROM \"{}\" WHERE \"{}\" = ?1 LIMIT 1",
      self.table(kind),
      column
    );
    let param = sql_from_json(value);
    let row = query_rows(&conn, &sql, &[&param])?
      .into_iter()
      .next()
      .ok_or_else(|| StoreError::NotFound {
        kind,
        field: column.to_string(),
        value: value
          .as_str()
          .map(String::from)
          .unwrap_or_else(|| value.to_string()),
      })?;

    Ok(CachedEntity {
      date_added: row_timestamp(&row, DATE_ADDED)?,
      last_updated: row_timestamp(&row, LAST_UPDATED)?,
      entity: hydrate(&row, kind.descriptor()),
    })
  }

  /// Store an entity. Updates rewrite every column except `id` and
  /// `dateAdded`; an update that matches no row falls back to an insert.
  pub fn write(&self, entity: &Entity, is_update: bool) -> Result<(), StoreError> {
    let now = Utc::now();
    let table = self.table(entity.kind());
    let conn = self.db.lock()?;

    if is_update {
      let row = dry(entity, WriteMode::Update, now);
      if update(&conn, &table, entity.id(), &row)? > 0 {
        return Ok(());
      }
      debug!(entity = %entity.kind(), id = entity.id(), "No cached row to update, inserting");
    }

    let row = dry(entity, WriteMode::Insert, now);
    insert(&conn, &table, &row)
  }
}

fn checked_column(kind: EntityKind, column: &str) -> Result<&'static str, StoreError> {
  kind
    .descriptor()
    .field(column)
    .map(|f| f.name)
    .ok_or_else(|| StoreError::UnknownColumn {
      kind,
      column: column.to_string(),
    })
}

fn key_value(key: &EntityKey) -> SqlValue {
  match key {
    EntityKey::Id(id) => SqlValue::Integer(i64::try_from(*id).unwrap_or(i64::MAX)),
    EntityKey::Slug(slug) => SqlValue::Text(slug.clone()),
  }
}

fn row_timestamp(row: &Row, column: &str) -> Result<DateTime<Utc>, StoreError> {
  let raw = row.get(column).and_then(Value::as_str).unwrap_or_default();
  parse_datetime(raw)
}

// Concurrent refreshes of one key both land; the last write wins.
fn insert(conn: &Connection, table: &str, row: &Row) -> Result<(), StoreError> {
  let columns: Vec<String> = row.keys().map(|c| format!("\"{}\"", c)).collect();
  let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{}", i)).collect();
  let sql = format!(
    "INSERT OR REPLACE INTO \"{}\" ({}) VALUES ({})",
    table,
    columns.join(", "),
    placeholders.join(", ")
  );

  let values: Vec<SqlValue> = row.values().map(sql_from_json).collect();
  conn.execute(&sql, params_from_iter(values.iter()))?;
  Ok(())
}

fn update(conn: &Connection, table: &str, id: u64, row: &Row) -> Result<usize, StoreError> {
  let mut assignments = Vec::new();
  let mut values = Vec::new();
  for (column, value) in row.iter().filter(|(c, _)| c.as_str() != "id") {
    values.push(sql_from_json(value));
    assignments.push(format!("\"{}\" = ?{}", column, values.len()));
  }
  values.push(SqlValue::Integer(i64::try_from(id).unwrap_or(i64::MAX)));

  let sql = format!(
    "UPDATE \"{}\" SET {} WHERE \"id\" = ?{}",
    table,
    assignments.join(", "),
    values.len()
  );

  Ok(conn.execute(&sql, params_from_iter(values.iter()))?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metadata::FieldValue;

  fn store() -> CacheStore {
    CacheStore::new(Database::open_in_memory().unwrap(), "IGDB").unwrap()
  }

  fn genre(id: u64, name: &str) -> Entity {
    Entity::new(EntityKind::Genre, id)
      .with("name", FieldValue::Text(name.to_string()))
      .unwrap()
      .with("slug", FieldValue::Text(name.to_lowercase()))
      .unwrap()
  }

  #[test]
  fn test_status_follows_ttl() {
    let store = store();
    let key = EntityKey::Id(5);
    assert_eq!(
      store.status(EntityKind::Genre, &key).unwrap(),
      CacheStatus::NotPresent
    );

    store.write(&genre(5, "Puzzle"), false).unwrap();
    let written = Utc::now();

    let an_hour_on = written + Duration::hours(1);
    assert_eq!(
      store.status_at(EntityKind::Genre, &key, an_hour_on).unwrap(),
      CacheStatus::Current
    );

    let eight_days_on = written + Duration::days(8);
    assert_eq!(
      store.status_at(EntityKind::Genre, &key, eight_days_on).unwrap(),
      CacheStatus::Expired
    );
  }

  #[test]
  fn test_read_by_id_and_slug() {
    let store = store();
    store.write(&genre(9, "Racing"), false).unwrap();

    let by_id = store.read(EntityKind::Genre, &EntityKey::Id(9)).unwrap();
    assert_eq!(by_id.entity, genre(9, "Racing"));

    let by_slug = store
      .read(EntityKind::Genre, &EntityKey::Slug("racing".into()))
      .unwrap();
    assert_eq!(by_slug.entity.id(), 9);
    assert_eq!(by_slug.date_added, by_slug.last_updated);
  }

  #[test]
  fn test_read_missing_row_is_not_found() {
    let store = store();
    let err = store
      .read(EntityKind::Platform, &EntityKey::Id(404))
      .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { kind: EntityKind::Platform, .. }));
    assert!(err.to_string().contains("404"));
  }

  #[test]
  fn test_read_by_unknown_column() {
    let store = store();
    let err = store
      .read_by(EntityKind::Genre, "nope", &Value::from(1))
      .unwrap_err();
    assert!(matches!(err, StoreError::UnknownColumn { .. }));
  }

  #[test]
  fn test_update_keeps_date_added() {
    let store = store();
    store.write(&genre(3, "Shooter"), false).unwrap();
    {
      let conn = store.db.lock().unwrap();
      conn
        .execute(
          "UPDATE \"IGDB_Genre\" SET \"dateAdded\" = '2020-01-01 00:00:00' WHERE id = 3",
          [],
        )
        .unwrap();
    }

    store.write(&genre(3, "Shooter (FPS)"), true).unwrap();
    let cached = store.read(EntityKind::Genre, &EntityKey::Id(3)).unwrap();
    assert_eq!(cached.entity.name(), Some("Shooter (FPS)"));
    assert_eq!(
      cached.date_added,
      parse_datetime("2020-01-01 00:00:00").unwrap()
    );
  }

  #[test]
  fn test_update_without_row_inserts() {
    let store = store();
    store.write(&genre(4, "Strategy"), true).unwrap();
    assert!(store.read(EntityKind::Genre, &EntityKey::Id(4)).is_ok());
  }

  #[test]
  fn test_rejects_bad_prefix() {
    let db = Database::open_in_memory().unwrap();
    assert!(matches!(
      CacheStore::new(db, "IGDB\"; --"),
      Err(StoreError::InvalidSchema(_))
    ));
  }
}
