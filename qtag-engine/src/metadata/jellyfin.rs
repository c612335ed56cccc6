//! Jellyfin metadata client
//!
//! Implements [`MetadataSource`] against the Jellyfin/Emby REST API.
//!
//! # API Reference
//! - Item: `GET {base}/Users/{userId}/Items/{itemId}`
//! - Children: `GET {base}/Items?ParentId=..&IncludeItemTypes=..&SortBy=..&SortOrder=Ascending&Limit=1`
//! - Auth: `X-Emby-Token` header

use super::raw::{map_first_child, map_item, parse_body};
use super::{ChildQuery, ItemId, ItemMetadata, MetadataSource};
use crate::error::{EngineError, ResolveError};
use async_trait::async_trait;
use qtag_common::config::ServerSettings;
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;

/// Default timeout for API requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Header carrying the API token
const TOKEN_HEADER: &str = "X-Emby-Token";

const USER_AGENT: &str = concat!("qtag/", env!("CARGO_PKG_VERSION"));

/// Jellyfin REST client
pub struct JellyfinClient {
    http_client: Client,
    base_url: String,
}

impl JellyfinClient {
    /// Create a client for `base_url`, optionally authenticated
    pub fn new(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, EngineError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(EngineError::InvalidConfig("server base_url is empty".into()));
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(header::USER_AGENT, header::HeaderValue::from_static(USER_AGENT));
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = header::HeaderValue::from_str(key)
                .map_err(|e| EngineError::InvalidConfig(format!("api_key is not a valid header: {}", e)))?;
            headers.insert(TOKEN_HEADER, value);
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Create a client from the `[server]` config section
    pub fn from_settings(settings: &ServerSettings, timeout: Option<Duration>) -> Result<Self, EngineError> {
        let base_url = settings
            .base_url
            .as_deref()
            .ok_or_else(|| EngineError::InvalidConfig("server.base_url is not set".into()))?;
        Self::new(
            base_url,
            settings.api_key.as_deref(),
            timeout.unwrap_or(DEFAULT_TIMEOUT),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<serde_json::Value, ResolveError> {
        let response = self
            .http_client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ResolveError::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::Network(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(ResolveError::Api(status.as_u16(), body));
        }

        parse_body(&body)
    }
}

#[async_trait]
impl MetadataSource for JellyfinClient {
    async fn get_item(&self, user_id: &str, item_id: &ItemId) -> Result<ItemMetadata, ResolveError> {
        debug!(item_id = %item_id, "Fetching item metadata");
        let url = format!("{}/Users/{}/Items/{}", self.base_url, user_id, item_id);
        let value = self.get_json(&url, &[]).await?;
        Ok(map_item(item_id, value))
    }

    async fn first_child(
        &self,
        user_id: &str,
        parent_id: &ItemId,
        query: &ChildQuery,
    ) -> Result<Option<ItemId>, ResolveError> {
        debug!(
            parent_id = %parent_id,
            include = query.include.type_name(),
            sort_by = query.sort_by.as_str(),
            "Looking up representative child"
        );
        let url = format!("{}/Items", self.base_url);
        let params = [
            ("ParentId", parent_id.to_string()),
            ("IncludeItemTypes", query.include.type_name().to_string()),
            ("Recursive", query.recursive.to_string()),
            ("SortBy", query.sort_by.as_str().to_string()),
            ("SortOrder", "Ascending".to_string()),
            ("Limit", "1".to_string()),
            ("userId", user_id.to_string()),
        ];
        let value = self.get_json(&url, &params).await?;
        Ok(map_first_child(value))
    }
}
