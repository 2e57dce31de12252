//! Entity values and identity references.

use chrono::{DateTime, FixedOffset};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::registry::{EndpointDescriptor, EntityKind, FieldKind};
use crate::error::MappingError;

/// A reference to a single remote entity, carrying only its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref {
  pub target: EntityKind,
  pub id: u64,
}

/// A list of references to remote entities of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefList {
  pub target: EntityKind,
  pub ids: Vec<u64>,
}

/// Value of one entity field, shaped by its registry `FieldKind`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  Ref(Ref),
  RefList(RefList),
  Timestamp(DateTime<FixedOffset>),
  Int32Array(Vec<i32>),
  Int64Array(Vec<i64>),
  DoubleArray(Vec<f64>),
  Enum(i32),
  Integer(i64),
  Double(f64),
  Boolean(bool),
  Text(String),
}

impl FieldValue {
  /// Whether this value is acceptable for a field of the given kind.
  pub fn fits(&self, kind: FieldKind) -> bool {
    match (self, kind) {
      (FieldValue::Ref(r), FieldKind::Ref(target)) => r.target == target,
      (FieldValue::RefList(r), FieldKind::RefList(target)) => r.target == target,
      (FieldValue::Timestamp(_), FieldKind::Timestamp)
      | (FieldValue::Int32Array(_), FieldKind::Int32Array)
      | (FieldValue::Int64Array(_), FieldKind::Int64Array)
      | (FieldValue::DoubleArray(_), FieldKind::DoubleArray)
      | (FieldValue::Enum(_), FieldKind::Enum)
      | (FieldValue::Integer(_), FieldKind::Integer)
      | (FieldValue::Double(_), FieldKind::Double)
      | (FieldValue::Boolean(_), FieldKind::Boolean)
      | (FieldValue::Text(_), FieldKind::Text) => true,
      _ => false,
    }
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      FieldValue::Ref(_) => "reference",
      FieldValue::RefList(_) => "reference list",
      FieldValue::Timestamp(_) => "timestamp",
      FieldValue::Int32Array(_) => "int32 array",
      FieldValue::Int64Array(_) => "int64 array",
      FieldValue::DoubleArray(_) => "double array",
      FieldValue::Enum(_) => "enum",
      FieldValue::Integer(_) => "integer",
      FieldValue::Double(_) => "double",
      FieldValue::Boolean(_) => "boolean",
      FieldValue::Text(_) => "text",
    }
  }
}

impl Serialize for FieldValue {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      FieldValue::Ref(r) => serializer.serialize_u64(r.id),
      FieldValue::RefList(r) => r.ids.serialize(serializer),
      FieldValue::Timestamp(ts) => serializer.serialize_str(&ts.to_rfc3339()),
      FieldValue::Int32Array(v) => v.serialize(serializer),
      FieldValue::Int64Array(v) => v.serialize(serializer),
      FieldValue::DoubleArray(v) => v.serialize(serializer),
      FieldValue::Enum(v) => serializer.serialize_i32(*v),
      FieldValue::Integer(v) => serializer.serialize_i64(*v),
      FieldValue::Double(v) => serializer.serialize_f64(*v),
      FieldValue::Boolean(v) => serializer.serialize_bool(*v),
      FieldValue::Text(v) => serializer.serialize_str(v),
    }
  }
}

/// A provider entity: its type, id and the fields that were populated.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
  kind: EntityKind,
  id: u64,
  fields: BTreeMap<&'static str, FieldValue>,
}

impl Entity {
  pub fn new(kind: EntityKind, id: u64) -> Self {
    Self {
      kind,
      id,
      fields: BTreeMap::new(),
    }
  }

  pub fn kind(&self) -> EntityKind {
    self.kind
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn descriptor(&self) -> &'static EndpointDescriptor {
    self.kind.descriptor()
  }

  /// Set a declared field. The value must fit the field's registry kind.
  pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), MappingError> {
    let field = self
      .descriptor()
      .field(name)
      .filter(|f| f.kind != FieldKind::Id)
      .ok_or_else(|| MappingError::UnknownField {
        kind: self.kind,
        field: name.to_string(),
      })?;

    if !value.fits(field.kind) {
      return Err(MappingError::TypeMismatch {
        kind: self.kind,
        field: name.to_string(),
        expected: kind_label(field.kind),
        found: value.type_name().to_string(),
      });
    }

    self.fields.insert(field.name, value);
    Ok(())
  }

  /// Builder-style `set` for known-good values.
  pub fn with(mut self, name: &str, value: FieldValue) -> Result<Self, MappingError> {
    self.set(name, value)?;
    Ok(self)
  }

  pub fn get(&self, name: &str) -> Option<&FieldValue> {
    self.fields.get(name)
  }

  /// Populated fields in name order.
  pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
    self.fields.iter().map(|(name, value)| (*name, value))
  }

  pub fn text(&self, name: &str) -> Option<&str> {
    match self.get(name)? {
      FieldValue::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn name(&self) -> Option<&str> {
    self.text("name")
  }

  pub fn slug(&self) -> Option<&str> {
    self.text("slug")
  }

  pub fn reference(&self, name: &str) -> Option<Ref> {
    match self.get(name)? {
      FieldValue::Ref(r) => Some(*r),
      _ => None,
    }
  }

  pub fn references(&self, name: &str) -> Option<&RefList> {
    match self.get(name)? {
      FieldValue::RefList(r) => Some(r),
      _ => None,
    }
  }
}

impl Serialize for Entity {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
    map.serialize_entry("id", &self.id)?;
    for (name, value) in &self.fields {
      map.serialize_entry(name, value)?;
    }
    map.end()
  }
}

pub(crate) fn kind_label(kind: FieldKind) -> &'static str {
  match kind {
    FieldKind::Id => "id",
    FieldKind::Ref(_) => "reference",
    FieldKind::RefList(_) => "reference list",
    FieldKind::Timestamp => "timestamp",
    FieldKind::Int32Array => "int32 array",
    FieldKind::Int64Array => "int64 array",
    FieldKind::DoubleArray => "double array",
    FieldKind::Enum => "enum",
    FieldKind::Integer => "integer",
    FieldKind::Double => "double",
    FieldKind::Boolean => "boolean",
    FieldKind::Text => "text",
  }
}

// ============================================================================
// Entity keys
// ============================================================================

/// How a caller identifies an entity: numeric id or slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
  Id(u64),
  Slug(String),
}

impl EntityKey {
  /// Column the key is matched against.
  pub fn column(&self) -> &'static str {
    match self {
      EntityKey::Id(_) => "id",
      EntityKey::Slug(_) => "slug",
    }
  }

  /// Filter expression selecting this key, e.g. `where id = 5`.
  pub fn filter(&self) -> String {
    match self {
      EntityKey::Id(id) => format!("where id = {}", id),
      EntityKey::Slug(slug) => format!("where slug = \"{}\"", slug),
    }
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityKey::Id(id) => write!(f, "{}", id),
      EntityKey::Slug(slug) => f.write_str(slug),
    }
  }
}

impl From<u64> for EntityKey {
  fn from(id: u64) -> Self {
    EntityKey::Id(id)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity key '{0}': expected a numeric id or a slug")]
pub struct InvalidKey(pub String);

impl FromStr for EntityKey {
  type Err = InvalidKey;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if let Ok(id) = s.parse::<u64>() {
      return Ok(EntityKey::Id(id));
    }

    // Slugs are interpolated into filter expressions
    let valid = !s.is_empty()
      && s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
      Ok(EntityKey::Slug(s.to_string()))
    } else {
      Err(InvalidKey(s.to_string()))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_set_checks_declared_kind() {
    let mut game = Entity::new(EntityKind::Game, 1);
    assert!(game
      .set("name", FieldValue::Text("Zelda".to_string()))
      .is_ok());
    assert!(matches!(
      game.set("name", FieldValue::Integer(3)),
      Err(MappingError::TypeMismatch { .. })
    ));
    assert!(matches!(
      game.set("nonsense", FieldValue::Integer(3)),
      Err(MappingError::UnknownField { .. })
    ));
    assert!(game.set("id", FieldValue::Integer(3)).is_err());
  }

  #[test]
  fn test_reference_target_must_match() {
    let mut game = Entity::new(EntityKind::Game, 1);
    let wrong = FieldValue::Ref(Ref {
      target: EntityKind::Artwork,
      id: 9,
    });
    assert!(game.set("cover", wrong).is_err());

    let right = FieldValue::Ref(Ref {
      target: EntityKind::Cover,
      id: 9,
    });
    game.set("cover", right).unwrap();
    assert_eq!(game.reference("cover").map(|r| r.id), Some(9));
  }

  #[test]
  fn test_serialize_flattens_references() {
    let game = Entity::new(EntityKind::Game, 7)
      .with("name", FieldValue::Text("Doom".to_string()))
      .unwrap()
      .with(
        "platforms",
        FieldValue::RefList(RefList {
          target: EntityKind::Platform,
          ids: vec![6, 48],
        }),
      )
      .unwrap();

    let json = serde_json::to_value(&game).unwrap();
    assert_eq!(
      json,
      serde_json::json!({"id": 7, "name": "Doom", "platforms": [6, 48]})
    );
  }

  #[test]
  fn test_parse_key() {
    assert_eq!("42".parse::<EntityKey>().unwrap(), EntityKey::Id(42));
    assert_eq!(
      "super-mario-64".parse::<EntityKey>().unwrap(),
      EntityKey::Slug("super-mario-64".to_string())
    );
    assert!("bad\"slug".parse::<EntityKey>().is_err());
    assert!("".parse::<EntityKey>().is_err());
  }

  #[test]
  fn test_key_filter() {
    assert_eq!(EntityKey::Id(5).filter(), "where id = 5");
    assert_eq!(
      EntityKey::Slug("halo".to_string()).filter(),
      "where slug = \"halo\""
    );
  }
}
