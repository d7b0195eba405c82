//! Steam Web API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SteamConfig;
use crate::error::SourceError;
use crate::history::AppInfo;
use crate::steam::{AppListSource, PlayerCountSource};

/// `result` value the Web API uses for a successful lookup.
const RESULT_OK: i32 = 1;

/// HTTP client for the public Steam Web API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct SteamClient {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
}

impl SteamClient {
    pub fn new(config: &SteamConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("steamhistory/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            timeout: config.request_timeout,
        })
    }

    fn player_count_url(&self) -> String {
        format!(
            "{}/ISteamUserStats/GetNumberOfCurrentPlayers/v1/",
            self.api_base
        )
    }

    fn app_list_url(&self) -> String {
        format!("{}/ISteamApps/GetAppList/v2/", self.api_base)
    }

    fn map_send_error(&self, e: reqwest::Error) -> SourceError {
        if e.is_timeout() {
            SourceError::Timeout(self.timeout)
        } else {
            SourceError::from(e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlayerCountEnvelope {
    response: PlayerCountResponse,
}

#[derive(Debug, Deserialize)]
struct PlayerCountResponse {
    result: i32,
    player_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AppListEnvelope {
    applist: AppList,
}

#[derive(Debug, Deserialize)]
struct AppList {
    apps: Vec<AppListEntry>,
}

#[derive(Debug, Deserialize)]
struct AppListEntry {
    appid: u32,
    name: String,
}

fn parse_player_count(app_id: u32, body: &[u8]) -> Result<u32, SourceError> {
    let envelope: PlayerCountEnvelope = serde_json::from_slice(body).map_err(|e| {
        SourceError::InvalidResponse(format!("Failed to parse player count: {}", e))
    })?;

    let response = envelope.response;
    if response.result != RESULT_OK {
        return Err(SourceError::InvalidResponse(format!(
            "app {} returned result {}",
            app_id, response.result
        )));
    }

    response.player_count.ok_or_else(|| {
        SourceError::InvalidResponse(format!("app {} has no player_count", app_id))
    })
}

fn parse_app_list(body: &[u8]) -> Result<Vec<AppInfo>, SourceError> {
    let envelope: AppListEnvelope = serde_json::from_slice(body)
        .map_err(|e| SourceError::InvalidResponse(format!("Failed to parse app list: {}", e)))?;

    Ok(envelope
        .applist
        .apps
        .into_iter()
        .map(|entry| AppInfo::new(entry.appid, entry.name))
        .collect())
}

#[async_trait]
impl PlayerCountSource for SteamClient {
    async fn player_count(&self, app_id: u32) -> Result<u32, SourceError> {
        let response = self
            .client
            .get(self.player_count_url())
            .query(&[("appid", app_id)])
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::BadStatus {
                app_id,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        parse_player_count(app_id, &body)
    }
}

#[async_trait]
impl AppListSource for SteamClient {
    async fn app_list(&self) -> Result<Vec<AppInfo>, SourceError> {
        let response = self
            .client
            .get(self.app_list_url())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SourceError::Http(format!(
                "Status {}: {}",
                status, error_text
            )));
        }

        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        let apps = parse_app_list(&body)?;
        tracing::debug!(apps = apps.len(), "Fetched app list");
        Ok(apps)
    }
}
