//! Reads against a locally loaded copy of the provider's full dataset.
//!
//! The mirror is a separate database attached under its own schema, holding
//! one table per endpoint named after the endpoint (`igdb.games`, ...).
//! Queries go through the filter compiler; nothing here talks to the network.

use std::path::Path;
use tracing::debug;

use crate::cache::mapper::hydrate;
use crate::db::{query_named, Database, Row};
use crate::error::{ResolveError, StoreError};
use crate::filter::{CompiledQuery, QueryCompiler};
use crate::metadata::{Entity, EntityKey, EntityKind};

#[derive(Clone)]
pub struct Mirror {
  db: Database,
  compiler: QueryCompiler,
}

impl Mirror {
  /// Attach the mirror database at `path` under `schema`.
  pub fn attach(db: Database, path: &Path, schema: &str) -> Result<Self, StoreError> {
    db.attach(path, schema)?;
    debug!(path = %path.display(), schema, "Attached bulk mirror");

    Ok(Self {
      db,
      compiler: QueryCompiler::new(schema),
    })
  }

  /// Look up one entity by id or slug.
  pub fn find(&self, kind: EntityKind, key: &EntityKey) -> Result<Entity, ResolveError> {
    let query = self.compiler.compile(kind, "*", &key.filter(), true)?;

    self
      .run(&query)?
      .first()
      .map(|row| hydrate(row, kind.descriptor()))
      .ok_or_else(|| ResolveError::NotFound {
        kind,
        key: key.to_string(),
      })
  }

  /// Run an arbitrary filter expression and hydrate every row.
  pub fn search(
    &self,
    kind: EntityKind,
    fields: &str,
    filter: &str,
  ) -> Result<Vec<Entity>, ResolveError> {
    let query = self.compiler.compile(kind, fields, filter, false)?;

    Ok(
      self
        .run(&query)?
        .iter()
        .map(|row| hydrate(row, kind.descriptor()))
        .collect(),
    )
  }

  fn run(&self, query: &CompiledQuery) -> Result<Vec<Row>, StoreError> {
    debug!(sql = %query.sql, params = query.params.len(), "Querying mirror");
    let conn = self.db.lock()?;
    query_named(&conn, &query.sql, &query.params)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::error::CompileError;
  use crate::metadata::FieldValue;

  /// In-memory mirror with a handful of games.
  pub(crate) fn sample_mirror() -> Mirror {
    let db = Database::open_in_memory().unwrap();
    let mirror = Mirror::attach(db.clone(), Path::new(":memory:"), "igdb").unwrap();

    db.lock()
      .unwrap()
      .execute_batch(
        r#"
        CREATE TABLE igdb.games (
          id INTEGER PRIMARY KEY,
          name TEXT,
          slug TEXT,
          category INTEGER,
          rating REAL,
          platforms TEXT,
          mirror_only TEXT
        );
        INSERT INTO igdb.games VALUES
          (1942, 'The Witcher 3: Wild Hunt', 'the-witcher-3-wild-hunt', 0, 92.4, '[6,48,49,130]', 'x'),
          (1020, 'Grand Theft Auto V', 'grand-theft-auto-v', 0, 89.9, '[6,9,12,48,49]', 'y'),
          (7346, 'The Legend of Zelda: Breath of the Wild', 'the-legend-of-zelda-breath-of-the-wild', 0, 93.1, '[41,130]', NULL);
        "#,
      )
      .unwrap();

    mirror
  }

  #[test]
  fn test_find_by_id_and_slug() {
    let mirror = sample_mirror();

    let game = mirror.find(EntityKind::Game, &EntityKey::Id(1942)).unwrap();
    assert_eq!(game.name(), Some("The Witcher 3: Wild Hunt"));
    assert_eq!(game.get("rating"), Some(&FieldValue::Double(92.4)));
    assert_eq!(
      game.references("platforms").map(|r| r.ids.clone()),
      Some(vec![6, 48, 49, 130])
    );

    let game = mirror
      .find(EntityKind::Game, &EntityKey::Slug("grand-theft-auto-v".into()))
      .unwrap();
    assert_eq!(game.id(), 1020);
  }

  #[test]
  fn test_find_missing() {
    let mirror = sample_mirror();
    let err = mirror.find(EntityKind::Game, &EntityKey::Id(1)).unwrap_err();
    assert!(matches!(err, ResolveError::NotFound { kind: EntityKind::Game, .. }));
  }

  #[test]
  fn test_search_with_like_and_in() {
    let mirror = sample_mirror();

    let games = mirror
      .search(EntityKind::Game, "fields *;", r#"where name LIKE *"wild"*"#)
      .unwrap();
    assert_eq!(games.len(), 2);

    let games = mirror
      .search(EntityKind::Game, "fields id, name;", "where platforms = [41,9]")
      .unwrap();
    let mut ids: Vec<u64> = games.iter().map(Entity::id).collect();
    ids.sort();
    assert_eq!(ids, vec![1020, 7346]);
    assert!(games.iter().all(|g| g.get("slug").is_none()));

    let games = mirror
      .search(EntityKind::Game, "*", "where rating > 90; limit 1")
      .unwrap();
    assert_eq!(games.len(), 1);
  }

  #[test]
  fn test_numeric_values_match_text_columns() {
    let mirror = sample_mirror();
    mirror
      .db
      .lock()
      .unwrap()
      .execute_batch(
        "INSERT INTO igdb.games (id, name, slug) VALUES (1, '1942', '1942'), (2, 'Mario Kart 8', 'mario-kart-8');",
      )
      .unwrap();

    let games = mirror
      .search(EntityKind::Game, "*", r#"where name = "1942""#)
      .unwrap();
    assert_eq!(games.iter().map(Entity::id).collect::<Vec<_>>(), vec![1]);

    let games = mirror
      .search(EntityKind::Game, "*", "where name LIKE *8")
      .unwrap();
    assert_eq!(games.iter().map(Entity::id).collect::<Vec<_>>(), vec![2]);

    let games = mirror
      .search(EntityKind::Game, "*", "where rating > 92.5")
      .unwrap();
    assert_eq!(games.iter().map(Entity::id).collect::<Vec<_>>(), vec![7346]);
  }

  #[test]
  fn test_search_surfaces_compile_errors() {
    let mirror = sample_mirror();
    let err = mirror
      .search(EntityKind::Game, "fields id;", r#"search "zelda""#)
      .unwrap_err();
    assert!(matches!(
      err,
      ResolveError::Compile(CompileError::SearchRequiresNameField)
    ));
  }
}
