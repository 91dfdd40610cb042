//! REST API transport for the shrine site.
//!
//! This module provides:
//! - `HttpBackend`: the raw request/response boundary (`ReqwestBackend` in
//!   production)
//! - `ApiClient`: bearer-token injection, global `401` notification and
//!   envelope unwrapping on top of a backend
//! - `ApiError`: the error taxonomy shared by the cache and session layers

pub mod client;
pub mod error;
pub mod resources;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{ApiClient, AuthHook};
pub use error::{ApiError, ErrorKind};
pub use transport::{ApiRequest, ApiResponse, HttpBackend, ReqwestBackend, RequestKind};
