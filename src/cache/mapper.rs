//! Conversion between entities and flat cache rows.
//!
//! The column set is taken from the entity type's registry descriptor. A
//! column that fails to convert is logged and skipped; hydration never fails
//! as a whole.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::db::schema::{DATE_ADDED, LAST_UPDATED};
use crate::db::{format_datetime, Row};
use crate::error::MappingError;
use crate::metadata::api::{as_id, as_integer};
use crate::metadata::{
  kind_label, EndpointDescriptor, Entity, EntityKind, FieldDescriptor, FieldKind, FieldValue,
  Ref, RefList,
};

/// Whether a row is being created or refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
  Insert,
  Update,
}

/// Build an entity from a cache or mirror row.
pub fn hydrate(row: &Row, schema: &EndpointDescriptor) -> Entity {
  let kind = schema.kind;
  let id = row.get("id").and_then(as_id).unwrap_or_else(|| {
    warn!(entity = %kind, "Row has no usable id");
    0
  });

  let mut entity = Entity::new(kind, id);
  for (column, value) in row {
    if value.is_null() {
      continue;
    }
    // Columns the registry doesn't know about (dateAdded, mirror extras)
    let Some(field) = schema.field(column) else {
      continue;
    };
    if field.kind == FieldKind::Id {
      continue;
    }

    let result = hydrate_field(kind, field, value).and_then(|v| entity.set(field.name, v));
    if let Err(e) = result {
      warn!(entity = %kind, id, column = %column, error = %e, "Skipping column");
    }
  }

  entity
}

fn hydrate_field(
  kind: EntityKind,
  field: &FieldDescriptor,
  value: &Value,
) -> Result<FieldValue, MappingError> {
  let decoded = match field.kind {
    FieldKind::Id => None,
    FieldKind::Ref(target) => as_id(value).map(|id| FieldValue::Ref(Ref { target, id })),
    FieldKind::RefList(target) => {
      decode_json::<Vec<u64>>(value).map(|ids| FieldValue::RefList(RefList { target, ids }))
    }
    FieldKind::Timestamp => hydrate_timestamp(value).map(FieldValue::Timestamp),
    FieldKind::Int32Array => decode_json(value).map(FieldValue::Int32Array),
    FieldKind::Int64Array => decode_json(value).map(FieldValue::Int64Array),
    FieldKind::DoubleArray => decode_json(value).map(FieldValue::DoubleArray),
    FieldKind::Enum => value
      .as_i64()
      .and_then(|v| i32::try_from(v).ok())
      .map(FieldValue::Enum),
    FieldKind::Integer => as_integer(value).map(FieldValue::Integer),
    FieldKind::Double => value.as_f64().map(FieldValue::Double),
    FieldKind::Boolean => match value {
      Value::Bool(b) => Some(*b),
      Value::Number(n) => n.as_i64().map(|i| i != 0),
      _ => None,
    }
    .map(FieldValue::Boolean),
    FieldKind::Text => value.as_str().map(|s| FieldValue::Text(s.to_string())),
  };

  decoded.ok_or_else(|| MappingError::TypeMismatch {
    kind,
    field: field.name.to_string(),
    expected: kind_label(field.kind),
    found: value.to_string(),
  })
}

/// JSON text column, or a value that is already an array.
fn decode_json<T: DeserializeOwned>(value: &Value) -> Option<T> {
  match value {
    Value::String(s) => serde_json::from_str(s).ok(),
    other => serde_json::from_value(other.clone()).ok(),
  }
}

/// Naive timestamps are taken as UTC.
fn hydrate_timestamp(value: &Value) -> Option<DateTime<chrono::FixedOffset>> {
  match value {
    Value::String(s) => ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"]
      .iter()
      .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
      .map(|naive| naive.and_utc().fixed_offset())
      .or_else(|| DateTime::parse_from_rfc3339(s).ok()),
    Value::Number(n) => n
      .as_i64()
      .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
      .map(|dt| dt.fixed_offset()),
    _ => None,
  }
}

/// Flatten an entity into cache columns.
///
/// Every declared field gets a column (unset fields are NULL). `lastUpdated`
/// is always stamped; `dateAdded` only on insert.
pub fn dry(entity: &Entity, mode: WriteMode, now: DateTime<Utc>) -> Row {
  let mut columns = Row::new();

  for field in entity.descriptor().fields {
    let value = match field.kind {
      FieldKind::Id => Value::from(entity.id()),
      _ => entity.get(field.name).map(dry_value).unwrap_or(Value::Null),
    };
    columns.insert(field.name.to_string(), value);
  }

  let stamp = Value::String(format_datetime(now));
  columns.insert(LAST_UPDATED.to_string(), stamp.clone());
  if mode == WriteMode::Insert {
    columns.insert(DATE_ADDED.to_string(), stamp);
  }

  columns
}

fn dry_value(value: &FieldValue) -> Value {
  match value {
    FieldValue::Ref(r) => Value::from(r.id),
    FieldValue::RefList(r) => Value::String(Value::from(r.ids.clone()).to_string()),
    FieldValue::Timestamp(ts) => Value::String(format_datetime(ts.with_timezone(&Utc))),
    FieldValue::Int32Array(v) => Value::String(Value::from(v.clone()).to_string()),
    FieldValue::Int64Array(v) => Value::String(Value::from(v.clone()).to_string()),
    FieldValue::DoubleArray(v) => Value::String(Value::from(v.clone()).to_string()),
    FieldValue::Enum(v) => Value::from(*v),
    FieldValue::Integer(v) => Value::from(*v),
    FieldValue::Double(v) => Value::from(*v),
    FieldValue::Boolean(b) => Value::Bool(*b),
    FieldValue::Text(s) => Value::String(s.clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  fn sample_game() -> Entity {
    let released = Utc
      .with_ymd_and_hms(2017, 3, 3, 0, 0, 0)
      .unwrap()
      .fixed_offset();

    Entity::new(EntityKind::Game, 7346)
      .with("name", FieldValue::Text("The Legend of Zelda: Breath of the Wild".into()))
      .unwrap()
      .with("slug", FieldValue::Text("the-legend-of-zelda-breath-of-the-wild".into()))
      .unwrap()
      .with("category", FieldValue::Enum(0))
      .unwrap()
      .with("first_release_date", FieldValue::Timestamp(released))
      .unwrap()
      .with("rating", FieldValue::Double(92.5))
      .unwrap()
      .with("rating_count", FieldValue::Integer(3100))
      .unwrap()
      .with(
        "cover",
        FieldValue::Ref(Ref {
          target: EntityKind::Cover,
          id: 172453,
        }),
      )
      .unwrap()
      .with(
        "platforms",
        FieldValue::RefList(RefList {
          target: EntityKind::Platform,
          ids: vec![41, 130],
        }),
      )
      .unwrap()
      .with("tags", FieldValue::Int32Array(vec![1, 268435469]))
      .unwrap()
  }

  #[test]
  fn test_round_trip() {
    let game = sample_game();
    let row = dry(&game, WriteMode::Insert, Utc::now());
    let restored = hydrate(&row, EntityKind::Game.descriptor());
    assert_eq!(restored, game);
  }

  #[test]
  fn test_dry_shapes_columns() {
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let row = dry(&sample_game(), WriteMode::Insert, now);

    assert_eq!(row["id"], json!(7346));
    assert_eq!(row["cover"], json!(172453));
    assert_eq!(row["platforms"], json!("[41,130]"));
    assert_eq!(row["tags"], json!("[1,268435469]"));
    assert_eq!(row["first_release_date"], json!("2017-03-03 00:00:00"));
    assert_eq!(row["summary"], Value::Null);
    assert_eq!(row[LAST_UPDATED], json!("2024-01-02 03:04:05"));
    assert_eq!(row[DATE_ADDED], json!("2024-01-02 03:04:05"));
  }

  #[test]
  fn test_update_omits_date_added() {
    let row = dry(&sample_game(), WriteMode::Update, Utc::now());
    assert!(row.contains_key(LAST_UPDATED));
    assert!(!row.contains_key(DATE_ADDED));
  }

  #[test]
  fn test_bad_column_is_skipped() {
    let mut row = Row::new();
    row.insert("id".into(), json!(1));
    row.insert("name".into(), json!("Tetris"));
    row.insert("platforms".into(), json!("not json"));
    row.insert("category".into(), json!("zero"));
    row.insert("mystery_column".into(), json!(99));

    let game = hydrate(&row, EntityKind::Game.descriptor());
    assert_eq!(game.id(), 1);
    assert_eq!(game.name(), Some("Tetris"));
    assert!(game.get("platforms").is_none());
    assert!(game.get("category").is_none());
  }

  #[test]
  fn test_hydrate_accepts_native_arrays_and_integer_booleans() {
    let mut row = Row::new();
    row.insert("id".into(), json!(11));
    row.insert("content_descriptions".into(), json!([1, 2, 3]));
    let rating = hydrate(&row, EntityKind::AgeRating.descriptor());
    assert_eq!(
      rating.get("content_descriptions"),
      Some(&FieldValue::Int64Array(vec![1, 2, 3]))
    );

    let mut row = Row::new();
    row.insert("id".into(), json!(12));
    row.insert("animated".into(), json!(1));
    row.insert("alpha_channel".into(), json!(false));
    let cover = hydrate(&row, EntityKind::Cover.descriptor());
    assert_eq!(cover.get("animated"), Some(&FieldValue::Boolean(true)));
    assert_eq!(cover.get("alpha_channel"), Some(&FieldValue::Boolean(false)));
  }

  #[test]
  fn test_naive_timestamp_gets_zero_offset() {
    let mut row = Row::new();
    row.insert("id".into(), json!(1));
    row.insert("created_at".into(), json!("2011-02-03 04:05:06"));
    let genre = hydrate(&row, EntityKind::Genre.descriptor());

    match genre.get("created_at") {
      Some(FieldValue::Timestamp(ts)) => {
        assert_eq!(ts.offset().local_minus_utc(), 0);
        assert_eq!(ts.timestamp(), 1296705906);
      }
      other => panic!("unexpected {:?}", other),
    }
  }
}
