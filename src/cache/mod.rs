//! Cache module for storing proxy responses to disk
//!
//! A bounded [`CacheStore`] persists one JSON record per key with TTL expiry and
//! oldest-first eviction. [`CachePolicy`] describes, per resource class, how a fetch
//! should consult that store.

mod entry;
mod policy;
mod stats;
mod store;

pub use entry::{record_stem, sanitize_key, CacheEntry, MAX_PLAIN_STEM};
pub use policy::{CachePolicy, CacheStrategy, ParseStrategyError, PolicyTable};
pub use stats::CacheStats;
pub use store::{
    CacheConfig, CacheStore, CachedData, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_ENTRY_FRACTION,
    DEFAULT_MAX_SIZE_BYTES,
};
