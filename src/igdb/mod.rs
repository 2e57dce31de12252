//! IGDB provider access: HTTP client, rate limiting and the cached resolver.

mod cached_client;
mod client;
mod limiter;

pub use cached_client::MetadataClient;
pub use client::{IgdbClient, RemoteSource};
pub use limiter::RateLimiter;
