//! Core library for the shrine site admin client.
//!
//! Two cooperating components live here:
//!
//! - [`cache::ResponseCache`]: TTL-based response cache keyed by request
//!   fingerprint, with prefix invalidation and stale fallback.
//! - [`auth::SessionManager`]: admin token lifecycle (login, verify, logout)
//!   with automatic clearing on any `401` seen by the transport.
//!
//! [`loader::ResourceLoader`] composes both over [`api::ApiClient`], and
//! [`loader::ShrineApi`] exposes the typed operations page code calls.
//! Nothing here is global; the caller constructs and injects every component.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod loader;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError, ErrorKind};
pub use auth::{SessionManager, SessionState};
pub use cache::{CacheEntry, ResponseCache};
pub use config::Config;
pub use loader::{Loaded, Origin, ResourceLoader, ShrineApi};
