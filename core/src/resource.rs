//! Remote resources with a disk cache.
//!
//! A fetch is served from disk when the last successful download is younger
//! than the freshness window. Otherwise the resource is downloaded, persisted
//! and timestamped. When the download fails the bundled default is used if
//! the resource ships one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use reqwest::Client;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::warn;

use crate::config::UptickConfig;
use crate::error::FetchError;
use crate::preferences::PreferenceStore;

#[derive(Debug, Clone)]
pub struct Resource {
    /// File name inside the cache directory and preference key.
    pub name: String,
    pub url: String,
    pub fallback: Option<&'static [u8]>,
}

impl Resource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            fallback: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: &'static [u8]) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

pub struct ResourceFetcher {
    client: Client,
    cache_dir: PathBuf,
    freshness: Duration,
    prefs: Arc<dyn PreferenceStore>,
    permits: Semaphore,
}

impl ResourceFetcher {
    pub fn new(
        client: Client,
        cache_dir: PathBuf,
        freshness: Duration,
        max_connections: usize,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            client,
            cache_dir,
            freshness,
            prefs,
            permits: Semaphore::new(max_connections.max(1)),
        }
    }

    pub fn from_config(
        client: Client,
        config: &UptickConfig,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self::new(
            client,
            config.cache_dir(),
            config.freshness_window(),
            config.max_connections_per_host,
            prefs,
        )
    }

    pub async fn fetch(&self, resource: &Resource) -> Result<Bytes, FetchError> {
        if let Some(bytes) = self.fresh_from_disk(resource).await {
            debug!(resource = %resource.name, "serving resource from disk cache");
            return Ok(bytes);
        }

        match self.download(resource).await {
            Ok(bytes) => {
                self.persist(resource, &bytes).await;
                Ok(bytes)
            }
            Err(err) => match resource.fallback {
                Some(fallback) => {
                    warn!(resource = %resource.name, error = %err, "download failed, using bundled default");
                    Ok(Bytes::from_static(fallback))
                }
                None => Err(err),
            },
        }
    }

    fn cache_path(&self, resource: &Resource) -> PathBuf {
        self.cache_dir.join(&resource.name)
    }

    async fn fresh_from_disk(&self, resource: &Resource) -> Option<Bytes> {
        let fetched_at = self.prefs.last_fetch(&resource.name)?;
        let age = Utc::now().signed_duration_since(fetched_at).to_std().ok()?;
        if age >= self.freshness {
            return None;
        }
        tokio::fs::read(self.cache_path(resource))
            .await
            .ok()
            .map(Bytes::from)
    }

    async fn download(&self, resource: &Resource) -> Result<Bytes, FetchError> {
        let _permit = self.permits.acquire().await.ok();
        debug!(resource = %resource.name, url = %resource.url, "downloading resource");
        let response = self.client.get(&resource.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: resource.url.clone(),
            });
        }
        Ok(response.bytes().await?)
    }

    async fn persist(&self, resource: &Resource, bytes: &Bytes) {
        let write = async {
            tokio::fs::create_dir_all(&self.cache_dir).await?;
            tokio::fs::write(self.cache_path(resource), bytes).await
        };
        if let Err(err) = write.await {
            warn!(resource = %resource.name, error = %err, "failed to cache resource");
            return;
        }
        if let Err(err) = self.prefs.set_last_fetch(&resource.name, Utc::now()) {
            warn!(resource = %resource.name, error = %err, "failed to record fetch time");
        }
    }
}
