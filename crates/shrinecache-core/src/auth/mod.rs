//! Authentication module for the admin session.
//!
//! This module provides:
//! - `SessionManager`: token lifecycle (login, verify, logout) and the
//!   `401` hook installed into the API client
//! - `KeyValueStore`: durable storage for the token and principal snapshot,
//!   backed by a JSON file, the OS keychain, or memory

pub mod session;
pub mod store;

pub use session::{SessionManager, SessionState};
pub use store::{FileStore, KeyValueStore, KeyringStore, MemoryStore};
