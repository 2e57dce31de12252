//! Cache table definitions derived from the endpoint registry.

use crate::metadata::{EndpointDescriptor, EntityKind, FieldKind};

/// Column recording when a cache row was first written.
pub const DATE_ADDED: &str = "dateAdded";
/// Column recording the last successful refresh of a cache row.
pub const LAST_UPDATED: &str = "lastUpdated";

/// `CREATE TABLE` statements for every cache table under `prefix`.
pub fn cache_schema(prefix: &str) -> String {
  EntityKind::ALL
    .iter()
    .map(|kind| cache_table_ddl(kind.descriptor(), prefix))
    .collect::<Vec<_>>()
    .join("\n")
}

/// DDL for the cache table of one entity type.
pub fn cache_table_ddl(descriptor: &EndpointDescriptor, prefix: &str) -> String {
  let table = descriptor.cache_table(prefix);

  let mut columns: Vec<String> = descriptor
    .fields
    .iter()
    .map(|field| match field.kind {
      FieldKind::Id => format!("\"{}\" INTEGER PRIMARY KEY", field.name),
      kind => format!("\"{}\" {}", field.name, column_type(kind)),
    })
    .collect();
  columns.push(format!("\"{}\" TEXT NOT NULL", DATE_ADDED));
  columns.push(format!("\"{}\" TEXT NOT NULL", LAST_UPDATED));

  let mut ddl = format!(
    "CREATE TABLE IF NOT EXISTS \"{}\" (\n    {}\n);",
    table,
    columns.join(",\n    ")
  );

  if descriptor.supports_slug {
    ddl.push_str(&format!(
      "\nCREATE INDEX IF NOT EXISTS \"idx_{table}_slug\" ON \"{table}\"(\"slug\");"
    ));
  }

  ddl
}

fn column_type(kind: FieldKind) -> &'static str {
  match kind {
    FieldKind::Id | FieldKind::Ref(_) | FieldKind::Enum | FieldKind::Integer | FieldKind::Boolean => {
      "INTEGER"
    }
    FieldKind::Double => "REAL",
    FieldKind::RefList(_)
    | FieldKind::Timestamp
    | FieldKind::Int32Array
    | FieldKind::Int64Array
    | FieldKind::DoubleArray
    | FieldKind::Text => "TEXT",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rusqlite::Connection;

  #[test]
  fn test_schema_applies_cleanly() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(&cache_schema("IGDB")).unwrap();
    // Idempotent
    conn.execute_batch(&cache_schema("IGDB")).unwrap();

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'IGDB_%'",
        [],
        |r| r.get(0),
      )
      .unwrap();
    assert_eq!(count, EntityKind::ALL.len() as i64);
  }

  #[test]
  fn test_cover_ddl() {
    let ddl = cache_table_ddl(EntityKind::Cover.descriptor(), "IGDB");
    assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS \"IGDB_Cover\""));
    assert!(ddl.contains("\"id\" INTEGER PRIMARY KEY"));
    assert!(ddl.contains("\"game\" INTEGER"));
    assert!(ddl.contains("\"lastUpdated\" TEXT NOT NULL"));
    assert!(!ddl.contains("idx_"));
  }
}
