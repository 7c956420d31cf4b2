//! lmsfetch - cached, retrying data access for an LMS API proxy
//!
//! The library is built from four pieces:
//!
//! - [`failure`]: the closed failure taxonomy every operation reports through
//! - [`cache`]: a bounded, persistent [`CacheStore`](cache::CacheStore) and per-resource
//!   [`CachePolicy`](cache::CachePolicy)
//! - [`client`]: the authenticating, retrying [`ResilientClient`](client::ResilientClient)
//! - [`fetch`]: the [`CachedFetcher`](fetch::CachedFetcher) that combines them per request

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod failure;
pub mod fetch;

pub use failure::{Failure, FailureKind, Result};
pub use fetch::{CachedFetcher, Fetched, Source};
