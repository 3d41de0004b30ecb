use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::LookupError;

/// One result row of the app-store lookup API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreEntry {
    pub bundle_id: String,
    pub version: String,
    #[serde(default)]
    pub minimum_os_version: Option<String>,
    #[serde(default)]
    pub current_version_release_date: Option<String>,
    #[serde(default)]
    pub release_notes: Option<String>,
    #[serde(default)]
    pub track_view_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

/// Entity type of a lookup pass. The narrow pass is tried first and the
/// broad pass only for identifiers it did not return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Narrow,
    Broad,
}

impl Entity {
    pub fn as_str(self) -> &'static str {
        match self {
            Entity::Narrow => "desktopSoftware",
            Entity::Broad => "macSoftware",
        }
    }
}

#[async_trait]
pub trait LookupTransport: Send + Sync {
    /// Looks up every identifier in one request. Identifiers the remote does
    /// not know are simply absent from the result.
    async fn lookup(
        &self,
        region: &str,
        identifiers: &[String],
        entity: Entity,
    ) -> Result<Vec<AppStoreEntry>, LookupError>;
}

#[derive(Debug, Clone)]
pub struct AppStoreLookupClient {
    client: Client,
    url: String,
}

impl AppStoreLookupClient {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl LookupTransport for AppStoreLookupClient {
    async fn lookup(
        &self,
        region: &str,
        identifiers: &[String],
        entity: Entity,
    ) -> Result<Vec<AppStoreEntry>, LookupError> {
        let ids = identifiers.join(",");
        let limit = identifiers.len().to_string();
        debug!(region, entity = entity.as_str(), count = identifiers.len(), "app store lookup");

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("entity", entity.as_str()),
                ("country", region),
                ("bundleId", ids.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        let decoded: LookupResponse = serde_json::from_slice(&body)
            .map_err(|err| LookupError::Decode(err.to_string()))?;

        // Rows that do not describe an app (no bundleId or version) are skipped.
        Ok(decoded
            .results
            .into_iter()
            .filter_map(|row| serde_json::from_value::<AppStoreEntry>(row).ok())
            .collect())
    }
}
