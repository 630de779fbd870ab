//! Tag-indexed cache engine with in-flight de-duplication.
//!
//! This crate provides:
//! - `TagCache` - Memoizes producer results by key, tags them, and invalidates
//!   them by key or by tag
//! - `CacheOptions` / `CacheLife` - Per-lookup tags and lifetimes
//! - `CacheConfig` - Default TTL, capacity bound, and sweep interval
//! - `StatsSnapshot` - Hit/miss/invalidation counters
//!
//! # Example
//!
//! ```ignore
//! use tag_cache::{cache_key, CacheConfig, CacheLife, CacheOptions, TagCache};
//!
//! let cache = TagCache::new(CacheConfig::new().with_max_entries(10_000));
//!
//! // Item pages are tagged with the item; the list only with "products".
//! let product = cache
//!     .get(
//!         &cache_key!("product", id),
//!         move || async move { db.product(id).await },
//!         CacheOptions::new().tag(format!("product-{id}")).life(CacheLife::Hours),
//!     )
//!     .await?;
//!
//! // In a mutation handler or webhook:
//! cache.invalidate_tag(&format!("product-{id}"));
//! ```

mod config;
mod engine;
mod entry;
mod error;
mod index;
mod key;
mod policy;
mod stats;

pub use config::*;
pub use engine::{Lookup, TagCache};
pub use entry::{EntryState, EntryView};
pub use error::*;
pub use key::{MAX_TAGS_PER_ENTRY, MAX_TAG_LENGTH};
#[doc(hidden)]
pub use key::compose_key as __compose_key;
pub use policy::*;
pub use stats::{CacheStatus, StatsSnapshot};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{cache_key, CacheConfig, CacheError, CacheLife, CacheOptions, TagCache};
}
