//! Decoding of provider JSON payloads into entities.
//!
//! The provider returns references either as bare ids or, when a query expands
//! them, as objects carrying an `id`. Timestamps are unix seconds.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use super::entity::{kind_label, Entity, FieldValue, Ref, RefList};
use super::registry::{EntityKind, FieldDescriptor, FieldKind};
use crate::error::MappingError;

/// Build an entity from one object of a provider response.
///
/// A missing id is an error; any other field that fails to convert is logged
/// and left unset.
pub fn entity_from_api(kind: EntityKind, payload: &Value) -> Result<Entity, MappingError> {
  let object = payload
    .as_object()
    .ok_or(MappingError::MissingId { kind })?;
  let id = object
    .get("id")
    .and_then(as_id)
    .ok_or(MappingError::MissingId { kind })?;

  let mut entity = Entity::new(kind, id);
  for field in kind.descriptor().fields {
    if field.kind == FieldKind::Id {
      continue;
    }
    let value = match object.get(field.name) {
      Some(Value::Null) | None => continue,
      Some(value) => value,
    };

    let decoded = decode_field(kind, field, value).and_then(|v| entity.set(field.name, v));
    if let Err(e) = decoded {
      warn!(entity = %kind, id, field = field.name, error = %e, "Skipping provider field");
    }
  }

  Ok(entity)
}

fn decode_field(
  kind: EntityKind,
  field: &FieldDescriptor,
  value: &Value,
) -> Result<FieldValue, MappingError> {
  let mismatch = || MappingError::TypeMismatch {
    kind,
    field: field.name.to_string(),
    expected: kind_label(field.kind),
    found: value.to_string(),
  };

  let decoded = match field.kind {
    FieldKind::Id => None,
    FieldKind::Ref(target) => as_reference_id(value).map(|id| FieldValue::Ref(Ref { target, id })),
    FieldKind::RefList(target) => value
      .as_array()
      .and_then(|items| items.iter().map(as_reference_id).collect::<Option<Vec<_>>>())
      .map(|ids| FieldValue::RefList(RefList { target, ids })),
    FieldKind::Timestamp => as_timestamp(value).map(FieldValue::Timestamp),
    FieldKind::Int32Array => serde_json::from_value(value.clone())
      .ok()
      .map(FieldValue::Int32Array),
    FieldKind::Int64Array => serde_json::from_value(value.clone())
      .ok()
      .map(FieldValue::Int64Array),
    FieldKind::DoubleArray => serde_json::from_value(value.clone())
      .ok()
      .map(FieldValue::DoubleArray),
    FieldKind::Enum => value
      .as_i64()
      .and_then(|v| i32::try_from(v).ok())
      .map(FieldValue::Enum),
    FieldKind::Integer => as_integer(value).map(FieldValue::Integer),
    FieldKind::Double => value.as_f64().map(FieldValue::Double),
    FieldKind::Boolean => value.as_bool().map(FieldValue::Boolean),
    FieldKind::Text => value.as_str().map(|s| FieldValue::Text(s.to_string())),
  };

  decoded.ok_or_else(mismatch)
}

pub(crate) fn as_id(value: &Value) -> Option<u64> {
  match value {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Bare id, or an expanded object's `id`.
fn as_reference_id(value: &Value) -> Option<u64> {
  match value {
    Value::Object(object) => object.get("id").and_then(as_id),
    other => as_id(other),
  }
}

pub(crate) fn as_integer(value: &Value) -> Option<i64> {
  value.as_i64().or_else(|| {
    value
      .as_f64()
      .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
      .map(|f| f as i64)
  })
}

fn as_timestamp(value: &Value) -> Option<DateTime<chrono::FixedOffset>> {
  match value {
    Value::Number(n) => n
      .as_i64()
      .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
      .map(|dt| dt.fixed_offset()),
    Value::String(s) => DateTime::parse_from_rfc3339(s).ok(),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use serde_json::json;

  #[test]
  fn test_decode_game_payload() {
    let payload = json!({
      "id": 1942,
      "name": "The Witcher 3: Wild Hunt",
      "slug": "the-witcher-3-wild-hunt",
      "cover": 89386,
      "platforms": [6, 48, {"id": 49, "name": "Xbox One"}],
      "first_release_date": 1431993600,
      "rating": 93.5,
      "category": 0,
      "tags": [1, 27],
      "unknown_field": "ignored"
    });

    let game = entity_from_api(EntityKind::Game, &payload).unwrap();
    assert_eq!(game.id(), 1942);
    assert_eq!(game.name(), Some("The Witcher 3: Wild Hunt"));
    assert_eq!(
      game.reference("cover"),
      Some(Ref {
        target: EntityKind::Cover,
        id: 89386
      })
    );
    assert_eq!(game.references("platforms").unwrap().ids, vec![6, 48, 49]);
    assert_eq!(
      game.get("first_release_date"),
      Some(&FieldValue::Timestamp(
        Utc.timestamp_opt(1431993600, 0).unwrap().fixed_offset()
      ))
    );
    assert_eq!(game.get("rating"), Some(&FieldValue::Double(93.5)));
    assert_eq!(game.get("category"), Some(&FieldValue::Enum(0)));
    assert_eq!(game.get("tags"), Some(&FieldValue::Int32Array(vec![1, 27])));
  }

  #[test]
  fn test_bad_field_is_skipped() {
    let payload = json!({"id": 3, "name": 17, "slug": "three"});
    let game = entity_from_api(EntityKind::Game, &payload).unwrap();
    assert_eq!(game.name(), None);
    assert_eq!(game.slug(), Some("three"));
  }

  #[test]
  fn test_missing_id() {
    let payload = json!({"name": "No id"});
    assert_eq!(
      entity_from_api(EntityKind::Genre, &payload),
      Err(MappingError::MissingId {
        kind: EntityKind::Genre
      })
    );
  }
}
