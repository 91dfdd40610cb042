//! Typed site operations over the cached loaders.
//!
//! Reads go through one of two loaders: `content` (gallery, team) with the
//! long TTL and `live` (livestream, dashboard stats) with the short one.
//! Every mutation names the families it invalidates.

use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{Loaded, ResourceLoader};
use crate::api::resources::{
    self, DASHBOARD_STATS, GALLERY_ADMIN, GALLERY_FAMILIES, GALLERY_PUBLIC, LIVESTREAM,
    MANAGEMENT_TEAM,
};
use crate::api::{ApiClient, ApiError};
use crate::auth::SessionState;
use crate::cache::ResponseCache;
use crate::config::Config;
use crate::models::{DashboardStats, GalleryItem, GalleryItemInput, LivestreamStatus, TeamMember};

/// Shortest livestream polling period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ShrineApi {
    content: ResourceLoader,
    live: ResourceLoader,
}

impl ShrineApi {
    pub fn new(content: ResourceLoader, live: ResourceLoader) -> Self {
        Self { content, live }
    }

    /// Build both loaders over `client` with the configured TTLs.
    pub fn from_config(client: ApiClient, config: &Config) -> Self {
        Self::new(
            ResourceLoader::new(client.clone(), ResponseCache::from_secs(config.content_ttl_secs)),
            ResourceLoader::new(client, ResponseCache::from_secs(config.stats_ttl_secs)),
        )
    }

    pub fn content(&self) -> &ResourceLoader {
        &self.content
    }

    pub fn live(&self) -> &ResourceLoader {
        &self.live
    }

    // ===== Reads =====

    pub async fn public_gallery(
        &self,
        limit: u32,
        page: u32,
        category: Option<&str>,
    ) -> Result<Loaded<Vec<GalleryItem>>, ApiError> {
        let limit = limit.to_string();
        let page = page.to_string();
        let params = [
            ("limit", limit.as_str()),
            ("page", page.as_str()),
            ("category", category.unwrap_or_default()),
        ];
        self.content.load_as(GALLERY_PUBLIC, &params).await
    }

    /// All gallery items including unpublished ones. Requires a session.
    pub async fn admin_gallery(&self, page: u32) -> Result<Loaded<Vec<GalleryItem>>, ApiError> {
        let page = page.to_string();
        self.content.load_as(GALLERY_ADMIN, &[("page", page.as_str())]).await
    }

    pub async fn management_team(&self) -> Result<Loaded<Vec<TeamMember>>, ApiError> {
        self.content.load_as(MANAGEMENT_TEAM, &[]).await
    }

    pub async fn livestream_status(&self) -> Result<Loaded<LivestreamStatus>, ApiError> {
        self.live.load_as(LIVESTREAM, &[]).await
    }

    pub async fn dashboard_stats(&self) -> Result<Loaded<DashboardStats>, ApiError> {
        self.live.load_as(DASHBOARD_STATS, &[]).await
    }

    // ===== Mutations =====

    async fn mutate_gallery<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let data = self.content.mutate(method, path, body, GALLERY_FAMILIES).await?;
        self.live.invalidate(DASHBOARD_STATS);
        decode(data)
    }

    pub async fn create_gallery_item(&self, input: &GalleryItemInput) -> Result<GalleryItem, ApiError> {
        self.mutate_gallery(Method::POST, resources::GALLERY, Some(encode(input)?))
            .await
    }

    pub async fn update_gallery_item(
        &self,
        id: i64,
        input: &GalleryItemInput,
    ) -> Result<GalleryItem, ApiError> {
        self.mutate_gallery(Method::PUT, &resources::gallery_item(id), Some(encode(input)?))
            .await
    }

    pub async fn delete_gallery_item(&self, id: i64) -> Result<(), ApiError> {
        let _: Value = self
            .mutate_gallery(Method::DELETE, &resources::gallery_item(id), None)
            .await?;
        Ok(())
    }

    /// Flip an item between published and hidden.
    pub async fn toggle_gallery_item(&self, id: i64) -> Result<GalleryItem, ApiError> {
        self.mutate_gallery(Method::PATCH, &resources::gallery_item_toggle(id), None)
            .await
    }

    pub async fn update_team_member(&self, member: &TeamMember) -> Result<TeamMember, ApiError> {
        let data = self
            .content
            .mutate(
                Method::PUT,
                &resources::team_member(member.id),
                Some(encode(member)?),
                &[MANAGEMENT_TEAM],
            )
            .await?;
        self.live.invalidate(DASHBOARD_STATS);
        decode(data)
    }

    pub async fn update_livestream(&self, status: &LivestreamStatus) -> Result<LivestreamStatus, ApiError> {
        let data = self
            .live
            .mutate(Method::PUT, LIVESTREAM, Some(encode(status)?), &[LIVESTREAM])
            .await?;
        decode(data)
    }

    /// Drop everything cached, e.g. after the admin signs out.
    pub fn clear(&self) {
        self.content.clear();
        self.live.clear();
    }

    /// Drop admin-only data.
    pub fn forget_admin_data(&self) {
        self.content.invalidate(GALLERY_ADMIN);
        self.live.invalidate(DASHBOARD_STATS);
    }

    /// Forget admin-only data whenever the session ends, including when a
    /// `401` from any call expires it.
    pub fn follow_session(&self, mut events: broadcast::Receiver<SessionState>) {
        let api = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionState::Expired | SessionState::Anonymous) => api.forget_admin_data(),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Session events lagged");
                        api.forget_admin_data();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    // ===== Polling =====

    /// Poll the livestream status every `every` (at least 100ms) and publish it.
    ///
    /// Reads go through the short-TTL cache, so outages keep publishing the
    /// last good status. The task stops once every receiver is dropped.
    pub fn watch_livestream(&self, every: Duration) -> watch::Receiver<Option<LivestreamStatus>> {
        let (tx, rx) = watch::channel(None);
        let api = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(MIN_POLL_INTERVAL));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }
                match api.livestream_status().await {
                    Ok(loaded) => {
                        if tx.send(Some(loaded.payload)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Livestream poll failed"),
                }
            }
            debug!("Livestream watcher stopped");
        });

        rx
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}
