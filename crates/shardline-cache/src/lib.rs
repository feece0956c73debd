//! # shardline-cache
//!
//! Passive in-memory mirror of guilds, channels and roles. The cache only
//! reads the client event bus; it never talks back to shards.
//!
//! ```ignore
//! let cache = Arc::new(EntityCache::new(CacheOptions::default()));
//! let observer = cache.observe(client.events());
//! ```

mod observer;
mod options;
mod store;

pub use observer::CacheObserver;
pub use options::CacheOptions;
pub use store::{CachedChannel, CachedGuild, CachedRole, EntityCache};
