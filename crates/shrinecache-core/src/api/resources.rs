//! Endpoint paths and cache families for the site's resources.
//!
//! Cache keys for a family all start with the family's path, so invalidating
//! the path as a prefix drops every cached page/filter of that family.

/// Authentication endpoints.
pub const AUTH_LOGIN: &str = "auth/login";
pub const AUTH_VERIFY: &str = "auth/verify";
pub const AUTH_LOGOUT: &str = "auth/logout";

/// Published gallery items shown on the public pages.
pub const GALLERY_PUBLIC: &str = "gallery/public";

/// Every gallery item including hidden ones (admin console).
pub const GALLERY_ADMIN: &str = "gallery/admin";

/// Base path for gallery mutations.
pub const GALLERY: &str = "gallery";

pub const MANAGEMENT_TEAM: &str = "management-team";

pub const LIVESTREAM: &str = "livestream";

/// Aggregate counters for the admin dashboard.
pub const DASHBOARD_STATS: &str = "stats/dashboard";

/// Families touched by any gallery mutation.
pub const GALLERY_FAMILIES: &[&str] = &[GALLERY_PUBLIC, GALLERY_ADMIN];

pub fn gallery_item(id: i64) -> String {
    format!("{}/{}", GALLERY, id)
}

pub fn gallery_item_toggle(id: i64) -> String {
    format!("{}/{}/toggle", GALLERY, id)
}

pub fn team_member(id: i64) -> String {
    format!("{}/{}", MANAGEMENT_TEAM, id)
}
