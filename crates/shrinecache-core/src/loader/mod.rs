//! Cached data loading for pages and the admin console.
//!
//! - `ResourceLoader`: cache-first reads with in-flight collapsing and stale
//!   fallback, and mutations that invalidate before they return
//! - `ShrineApi`: the typed site operations built on two loaders

pub mod resource;
pub mod shrine;

pub use resource::{Loaded, Origin, ResourceLoader};
pub use shrine::ShrineApi;
