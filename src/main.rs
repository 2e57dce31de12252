use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gamemeta::cache::{CacheSource, CacheStatus, CacheStore};
use gamemeta::config::Config;
use gamemeta::db::Database;
use gamemeta::error::ResolveError;
use gamemeta::filter::{ParamValue, QueryCompiler};
use gamemeta::igdb::MetadataClient;
use gamemeta::metadata::{Entity, EntityKey, EntityKind};

#[derive(Parser, Debug)]
#[command(name = "gamemeta")]
#[command(about = "A local metadata cache and query compiler for IGDB")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/gamemeta/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve entities by id or slug
  Resolve {
    /// Entity type, e.g. Game or games
    entity: EntityKind,
    /// Ids or slugs
    #[arg(required = true)]
    keys: Vec<EntityKey>,
  },
  /// Show cache freshness for a key
  Status { entity: EntityKind, key: EntityKey },
  /// Compile a filter expression to SQL without running it
  Compile {
    entity: EntityKind,
    /// e.g. 'where rating > 80 & platforms = [6,48]; limit 10'
    filter: String,
    #[arg(long, default_value = "fields *;")]
    fields: String,
    /// Append LIMIT 1 when the filter has no limit clause
    #[arg(long)]
    single: bool,
    #[arg(long, default_value = "igdb")]
    schema: String,
  },
  /// Run a filter expression against the bulk mirror
  Search {
    entity: EntityKind,
    filter: String,
    #[arg(long, default_value = "*")]
    fields: String,
  },
  /// List known endpoints and their fields
  Endpoints,
}

#[derive(Serialize)]
struct Resolved<'a> {
  key: String,
  source: CacheSource,
  cached_at: Option<DateTime<Utc>>,
  entity: &'a Entity,
}

#[derive(Serialize)]
struct KeyStatus {
  entity: EntityKind,
  key: String,
  status: CacheStatus,
}

#[derive(Serialize)]
struct Compiled<'a> {
  sql: &'a str,
  params: &'a BTreeMap<String, ParamValue>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  match args.command {
    Command::Resolve { entity, keys } => {
      let config = Config::load(args.config.as_deref())?;
      let client = MetadataClient::new(&config)?;

      let results = join_all(
        keys
          .iter()
          .map(|key| client.resolve_with_source(entity, key)),
      )
      .await;

      let mut resolved = Vec::new();
      let mut failed = 0;
      for (key, result) in keys.iter().zip(&results) {
        match result {
          Ok(hit) => resolved.push(Resolved {
            key: key.to_string(),
            source: hit.source,
            cached_at: hit.cached_at,
            entity: &hit.data,
          }),
          Err(e) => {
            error!(entity = %entity, key = %key, error = %e, "Resolve failed");
            failed += 1;
          }
        }
      }

      print_json(&resolved)?;
      if failed > 0 {
        return Err(eyre!("{} of {} lookups failed", failed, keys.len()));
      }
    }
    Command::Status { entity, key } => {
      let config = Config::load(args.config.as_deref())?;
      let db = Database::open(config.cache.path.as_deref())?;
      let store = CacheStore::new(db, config.provider.table_prefix.as_str())?;

      print_json(&KeyStatus {
        entity,
        key: key.to_string(),
        status: store.status(entity, &key)?,
      })?;
    }
    Command::Compile {
      entity,
      filter,
      fields,
      single,
      schema,
    } => {
      let query = QueryCompiler::new(schema).compile(entity, &fields, &filter, single)?;
      print_json(&Compiled {
        sql: &query.sql,
        params: &query.params,
      })?;
    }
    Command::Search {
      entity,
      filter,
      fields,
    } => {
      let config = Config::load(args.config.as_deref())?;
      let client = MetadataClient::new(&config)?;
      let mirror = client.mirror().ok_or(ResolveError::MirrorUnavailable)?;

      print_json(&mirror.search(entity, &fields, &filter)?)?;
    }
    Command::Endpoints => {
      for kind in EntityKind::ALL {
        let descriptor = kind.descriptor();
        let fields: Vec<&str> = descriptor.fields.iter().map(|f| f.name).collect();
        println!(
          "{:<16} {:<20} {:<5} {}",
          kind.name(),
          descriptor.table_name,
          if descriptor.supports_slug { "slug" } else { "-" },
          fields.join(", ")
        );
      }
    }
  }

  Ok(())
}

/// Log to stderr, or through a non-blocking writer to `log_file`.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let registry = tracing_subscriber::registry().with(filter);

  match log_file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eyre!("Failed to open log file {}: {}", path.display(), e))?;
      let (writer, guard) = tracing_appender::non_blocking(file);
      registry
        .with(
          tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false),
        )
        .init();
      Ok(Some(guard))
    }
    None => {
      registry
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
      Ok(None)
    }
  }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
