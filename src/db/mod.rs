pub mod schema;

use chrono::{DateTime, NaiveDateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, ToSql};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::StoreError;
use crate::filter::{is_identifier, ParamValue};

/// Column values of one result row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Storage format of naive UTC timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Shared SQLite connection holding the cache tables and, when attached, the
/// bulk mirror.
#[derive(Clone)]
pub struct Database {
  conn: Arc<Mutex<Connection>>,
}

impl Database {
  /// Open or create the database at `path`, or at the default location
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    conn
      .execute_batch("PRAGMA journal_mode=WAL;")
      .map_err(|e| eyre!("Failed to enable WAL mode: {}", e))?;

    Self::from_connection(conn).map_err(|e| eyre!("Failed to initialise database: {}", e))
  }

  /// In-memory database, used by tests and one-shot tools.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    register_functions(&conn)?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("gamemeta").join("cache.db"))
  }

  /// Attach another database file under `schema`, so its tables resolve as
  /// `<schema>.<table>`.
  pub fn attach(&self, path: &Path, schema: &str) -> Result<(), StoreError> {
    if !is_identifier(schema) || schema.contains('.') {
      return Err(StoreError::InvalidSchema(schema.to_string()));
    }
    let conn = self.lock()?;
    conn.execute(
      &format!("ATTACH DATABASE ?1 AS {}", schema),
      [path.to_string_lossy().into_owned()],
    )?;
    Ok(())
  }

  /// Lock the connection
  pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self.conn.lock().map_err(|_| StoreError::LockPoisoned)
  }
}

/// Run a compiled statement, binding only the `@name` parameters it uses.
pub(crate) fn query_named(
  conn: &Connection,
  sql: &str,
  params: &BTreeMap<String, ParamValue>,
) -> Result<Vec<Row>, StoreError> {
  let mut stmt = conn.prepare(sql)?;
  for (name, value) in params {
    if let Some(index) = stmt.parameter_index(&format!("@{}", name))? {
      stmt.raw_bind_parameter(index, value)?;
    }
  }

  let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
  let mut rows = stmt.raw_query();
  let mut out = Vec::new();
  while let Some(row) = rows.next()? {
    out.push(read_row(row, &names)?);
  }

  Ok(out)
}

/// Run a statement with positional parameters.
pub(crate) fn query_rows(
  conn: &Connection,
  sql: &str,
  params: &[&dyn ToSql],
) -> Result<Vec<Row>, StoreError> {
  let mut stmt = conn.prepare(sql)?;
  let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
  let mut rows = stmt.query(params)?;
  let mut out = Vec::new();
  while let Some(row) = rows.next()? {
    out.push(read_row(row, &names)?);
  }

  Ok(out)
}

fn read_row(row: &rusqlite::Row<'_>, names: &[String]) -> rusqlite::Result<Row> {
  let mut out = Row::new();
  for (i, name) in names.iter().enumerate() {
    out.insert(name.clone(), json_from_sql(row.get_ref(i)?));
  }
  Ok(out)
}

pub(crate) fn json_from_sql(value: ValueRef<'_>) -> Value {
  match value {
    ValueRef::Null => Value::Null,
    ValueRef::Integer(i) => Value::from(i),
    ValueRef::Real(f) => serde_json::Number::from_f64(f)
      .map(Value::Number)
      .unwrap_or(Value::Null),
    ValueRef::Text(t) | ValueRef::Blob(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
  }
}

pub(crate) fn sql_from_json(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    other => SqlValue::Text(other.to_string()),
  }
}

/// Parse a datetime string from SQLite format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
  NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|_| StoreError::InvalidTimestamp(s.to_string()))
}

pub fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format(TIMESTAMP_FORMAT).to_string()
}

impl ToSql for ParamValue {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(match self {
      ParamValue::Text(s) => ToSqlOutput::from(s.as_str()),
      ParamValue::Double(v) => double_to_sql(*v),
      ParamValue::Bool(b) => ToSqlOutput::from(*b),
      ParamValue::TextArray(items) => ToSqlOutput::from(
        serde_json::to_string(items)
          .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
      ),
      ParamValue::Int64(v) => ToSqlOutput::from(*v),
      ParamValue::Int32(v) => ToSqlOutput::from(*v),
      ParamValue::Timestamp(ts) => ToSqlOutput::from(ts.format(TIMESTAMP_FORMAT).to_string()),
      ParamValue::TimestampOffset(ts) => ToSqlOutput::from(ts.to_rfc3339()),
    })
  }
}

/// Whole numbers bind as INTEGER so they compare equal to text columns
/// holding the same digits (`'1942'`, not `'1942.0'`).
fn double_to_sql(v: f64) -> ToSqlOutput<'static> {
  if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
    ToSqlOutput::from(v as i64)
  } else {
    ToSqlOutput::from(v)
  }
}

/// SQLite lacks `JSON_CONTAINS(target, candidate, path)`; provide the subset
/// compiled `IN` predicates rely on (path is always `$`).
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
  conn.create_scalar_function(
    "JSON_CONTAINS",
    3,
    FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
    |ctx| {
      let target = json_from_sql(ctx.get_raw(0));
      let candidate = json_from_sql(ctx.get_raw(1));
      Ok(json_contains(&target, &candidate))
    },
  )
}

fn json_contains(target: &Value, candidate: &Value) -> bool {
  let decode = |v: &Value| match v {
    Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| v.clone()),
    other => other.clone(),
  };
  let target = decode(target);
  let candidate = decode(candidate);

  match (&target, &candidate) {
    (Value::Array(items), Value::Array(wanted)) => wanted
      .iter()
      .all(|w| items.iter().any(|item| json_eq(item, w))),
    (Value::Array(items), c) => items.iter().any(|item| json_eq(item, c)),
    (t, c) => json_eq(t, c),
  }
}

fn json_eq(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}
