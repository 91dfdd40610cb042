//! Data models for the shrine site API.
//!
//! - `Principal`: the signed-in admin as reported by the server
//! - Content types: `GalleryItem`, `TeamMember`, `LivestreamStatus`,
//!   `DashboardStats`

pub mod content;
pub mod principal;

pub use content::{DashboardStats, GalleryItem, GalleryItemInput, LivestreamStatus, TeamMember};
pub use principal::{LoginRequest, LoginResponse, Principal};
