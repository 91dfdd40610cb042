//! In-memory response cache for API reads.
//!
//! This module provides the `ResponseCache` for storing fetched payloads by
//! request fingerprint. Entries go stale after the cache's TTL but are kept
//! until explicitly invalidated, so a failed refresh can still serve the last
//! good payload.
//!
//! Typical TTLs:
//! - 5 minutes for lists and detail resources (gallery, team, livestream)
//! - 1 minute for aggregate dashboard statistics

pub mod key;
pub mod manager;

pub use key::fingerprint;
pub use manager::{CacheEntry, ResponseCache, CONTENT_TTL_SECS, MAX_TTL_SECS, STATS_TTL_SECS};
