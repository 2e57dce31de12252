//! Local metadata cache and query compiler for the IGDB game database.
//!
//! Entities are resolved through a SQLite cache with a fixed TTL, fetched
//! from the provider under client-side rate limiting, or read from a bulk
//! mirror of the provider's dataset queried through the filter compiler.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod igdb;
pub mod metadata;
pub mod mirror;
