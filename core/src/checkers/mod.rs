//! Per-source update checks.
//!
//! The set of sources is closed, so the checks are one enum. Which variant a
//! bundle gets is decided by [`UpdateCheck::for_bundle`] from its source tag
//! alone.

mod app_store;
mod package_cask;
mod vendor_feed;

pub use app_store::AppStoreCheck;
pub use package_cask::PackageCaskCheck;
pub use vendor_feed::VendorFeedCheck;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::error::CheckError;
use crate::error::Result;
use crate::lookup::LookupBatcher;
use crate::model::Bundle;
use crate::model::Source;
use crate::model::Update;
use crate::repository::RepositoryCache;

/// Shared collaborators a check may need. Cheap to clone.
#[derive(Clone)]
pub struct CheckContext {
    pub client: Client,
    pub batcher: Arc<LookupBatcher>,
    /// Present for runs that contain package-cask bundles.
    pub repository: Option<Arc<RepositoryCache>>,
    pub region: String,
    pub locale: Option<String>,
}

impl CheckContext {
    pub fn new(client: Client, batcher: Arc<LookupBatcher>, region: impl Into<String>) -> Self {
        Self {
            client,
            batcher,
            repository: None,
            region: region.into(),
            locale: None,
        }
    }

    #[must_use]
    pub fn with_repository(mut self, repository: Arc<RepositoryCache>) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.locale = locale;
        self
    }
}

pub enum UpdateCheck {
    AppStore(AppStoreCheck),
    VendorFeed(VendorFeedCheck),
    PackageCask(PackageCaskCheck),
}

impl UpdateCheck {
    /// `None` for bundles that are never checked, and for package-cask
    /// bundles when the context carries no repository.
    pub fn for_bundle(bundle: &Bundle, ctx: &CheckContext) -> Option<Self> {
        match bundle.source {
            Source::None => None,
            Source::AppStore => Some(UpdateCheck::AppStore(AppStoreCheck::new(
                bundle.clone(),
                Arc::clone(&ctx.batcher),
                ctx.region.clone(),
            ))),
            Source::VendorFeed => Some(UpdateCheck::VendorFeed(VendorFeedCheck::new(
                bundle.clone(),
                ctx.client.clone(),
                ctx.locale.clone(),
            ))),
            Source::PackageCask => ctx.repository.as_ref().map(|repository| {
                UpdateCheck::PackageCask(PackageCaskCheck::new(
                    bundle.clone(),
                    Arc::clone(repository),
                ))
            }),
        }
    }

    pub fn bundle(&self) -> &Bundle {
        match self {
            UpdateCheck::AppStore(check) => check.bundle(),
            UpdateCheck::VendorFeed(check) => check.bundle(),
            UpdateCheck::PackageCask(check) => check.bundle(),
        }
    }

    pub fn source(&self) -> Source {
        self.bundle().source
    }

    /// Runs the check. Tripping `cancel` drops whatever request is in
    /// progress and resolves to [`CheckError::Cancelled`].
    pub async fn execute(&self, cancel: &CancellationToken) -> Result<Update> {
        let check = async {
            match self {
                UpdateCheck::AppStore(check) => check.execute().await,
                UpdateCheck::VendorFeed(check) => check.execute().await,
                UpdateCheck::PackageCask(check) => check.execute().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CheckError::Cancelled),
            result = check => result,
        }
    }
}
