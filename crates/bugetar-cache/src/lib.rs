//! Result cache for bugetar aggregations.
//!
//! [`ResultCache`] is a generic in-process map from cache keys to shared
//! results, bounded by entry count and total size, with a fixed time-to-live
//! per entry. It only stores and evicts; deciding what to compute on a miss is
//! the caller's job.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use bugetar_cache::{CacheConfig, ResultCache};
//!
//! let cache: ResultCache<Vec<u64>> = ResultCache::new(CacheConfig {
//!     max_items: 100,
//!     max_bytes: 1 << 20,
//!     ttl: Duration::from_secs(60),
//! });
//! cache.insert_serialized("aggregates:abc", vec![1u64, 2, 3]);
//! assert_eq!(cache.get("aggregates:abc").map(|v| v.len()), Some(3));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod clock;

pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use clock::{Clock, ManualClock, SystemClock};
