//! Package-cask repository: loads the catalog and exclusion list once per
//! check run and answers which catalog entry belongs to a bundle.
//!
//! Resolution requests that arrive while the two resources are still being
//! fetched are parked and answered as soon as loading completes.

mod catalog;
mod exclusions;

pub use catalog::Catalog;
pub use catalog::CatalogEntry;
pub use catalog::Resolution;
pub use catalog::decode_catalog;
pub use exclusions::BUNDLED_EXCLUSIONS;
pub use exclusions::decode_exclusions;
pub use exclusions::parse_exclusions;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::oneshot;
use tracing::info;
use tracing::warn;

use crate::config::UptickConfig;
use crate::model::Bundle;
use crate::resource::Resource;
use crate::resource::ResourceFetcher;

const CATALOG_RESOURCE: &str = "cask-catalog.json";
const EXCLUSIONS_RESOURCE: &str = "unsupported-apps.plist";

#[derive(Debug, Clone)]
pub struct RepositorySources {
    pub catalog: Resource,
    pub exclusions: Resource,
}

impl RepositorySources {
    pub fn new(catalog_url: impl Into<String>, exclusion_list_url: impl Into<String>) -> Self {
        Self {
            catalog: Resource::new(CATALOG_RESOURCE, catalog_url),
            exclusions: Resource::new(EXCLUSIONS_RESOURCE, exclusion_list_url)
                .with_fallback(BUNDLED_EXCLUSIONS),
        }
    }

    pub fn from_config(config: &UptickConfig) -> Self {
        Self::new(&config.catalog_url, &config.exclusion_list_url)
    }
}

/// Creates the repository cache for one check run.
pub trait RepositoryProvider: Send + Sync {
    fn load(&self) -> Arc<RepositoryCache>;
}

/// Loads the catalog and exclusion list through a [`ResourceFetcher`].
pub struct RepositoryLoader {
    fetcher: Arc<ResourceFetcher>,
    sources: RepositorySources,
}

impl RepositoryLoader {
    pub fn new(fetcher: Arc<ResourceFetcher>, sources: RepositorySources) -> Self {
        Self { fetcher, sources }
    }
}

impl RepositoryProvider for RepositoryLoader {
    fn load(&self) -> Arc<RepositoryCache> {
        RepositoryCache::load(Arc::clone(&self.fetcher), self.sources.clone())
    }
}

enum LoadState {
    Loading(Vec<oneshot::Sender<Arc<Catalog>>>),
    Ready(Arc<Catalog>),
}

pub struct RepositoryCache {
    state: Mutex<LoadState>,
}

impl RepositoryCache {
    /// Starts loading both resources concurrently on the current runtime and
    /// returns immediately.
    pub fn load(fetcher: Arc<ResourceFetcher>, sources: RepositorySources) -> Arc<Self> {
        let cache = Arc::new(Self {
            state: Mutex::new(LoadState::Loading(Vec::new())),
        });
        let loader = Arc::clone(&cache);
        tokio::spawn(async move {
            let catalog = fetch_catalog(&fetcher, &sources).await;
            loader.complete(catalog);
        });
        cache
    }

    /// A cache that is ready from the start.
    pub fn from_catalog(catalog: Catalog) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LoadState::Ready(Arc::new(catalog))),
        })
    }

    /// A cache whose load never completes.
    #[cfg(test)]
    pub(crate) fn never_ready() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LoadState::Loading(Vec::new())),
        })
    }

    /// Resolution requests currently parked on the load.
    #[cfg(test)]
    pub(crate) fn waiting(&self) -> usize {
        match &*self.lock() {
            LoadState::Loading(waiters) => waiters.iter().filter(|tx| !tx.is_closed()).count(),
            LoadState::Ready(_) => 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn finish_loading(&self, catalog: Catalog) {
        self.complete(catalog);
    }

    fn lock(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, catalog: Catalog) {
        let catalog = Arc::new(catalog);
        let waiters = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, LoadState::Ready(Arc::clone(&catalog))) {
                LoadState::Loading(waiters) => waiters,
                LoadState::Ready(_) => Vec::new(),
            }
        };
        for waiter in waiters {
            let _ = waiter.send(Arc::clone(&catalog));
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock(), LoadState::Ready(_))
    }

    /// The loaded catalog, waiting for the load to finish if necessary.
    pub async fn catalog(&self) -> Arc<Catalog> {
        let receiver = {
            let mut state = self.lock();
            match &mut *state {
                LoadState::Ready(catalog) => return Arc::clone(catalog),
                LoadState::Loading(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
            }
        };
        // The loader only drops the sender if its task was torn down.
        receiver
            .await
            .unwrap_or_else(|_| Arc::new(Catalog::empty()))
    }

    pub async fn resolve(&self, bundle: &Bundle) -> Option<CatalogEntry> {
        self.catalog().await.resolve(bundle).cloned()
    }
}

async fn fetch_catalog(fetcher: &ResourceFetcher, sources: &RepositorySources) -> Catalog {
    let (catalog, exclusions) = tokio::join!(
        fetcher.fetch(&sources.catalog),
        fetcher.fetch(&sources.exclusions),
    );
    let entries = match catalog {
        Ok(bytes) => decode_catalog(&bytes),
        Err(err) => {
            warn!(error = %err, "catalog unavailable, continuing with an empty catalog");
            Vec::new()
        }
    };
    let excluded = match exclusions {
        Ok(bytes) => parse_exclusions(&bytes).unwrap_or_else(|| {
            warn!("downloaded exclusion list is unusable, using the bundled list");
            decode_exclusions(BUNDLED_EXCLUSIONS)
        }),
        Err(err) => {
            warn!(error = %err, "exclusion list unavailable");
            HashSet::new()
        }
    };
    info!(
        entries = entries.len(),
        excluded = excluded.len(),
        "package catalog ready"
    );
    Catalog::new(entries, excluded)
}
