//! Local cache of provider entities.
//!
//! - One SQLite table per entity type, columns derived from the registry
//! - Rows expire after a fixed TTL and are refreshed on the next resolve
//! - Expired rows are served when the provider can't be reached

mod layer;
pub mod mapper;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStore, CachedEntity, CACHE_TTL_HOURS};
pub use traits::{CacheResult, CacheSource, CacheStatus};
