use std::sync::Arc;

use crate::error::CheckError;
use crate::error::Result;
use crate::model::Bundle;
use crate::model::Source;
use crate::model::Update;
use crate::model::UpdateAction;
use crate::repository::CatalogEntry;
use crate::repository::RepositoryCache;
use crate::repository::Resolution;
use crate::version::Version;

const MECHANISM: &str = "package cask";

pub struct PackageCaskCheck {
    bundle: Bundle,
    repository: Arc<RepositoryCache>,
}

impl PackageCaskCheck {
    pub fn new(bundle: Bundle, repository: Arc<RepositoryCache>) -> Self {
        Self { bundle, repository }
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    /// Waits for the run's catalog and resolves the bundle against it.
    pub async fn execute(&self) -> Result<Update> {
        let catalog = self.repository.catalog().await;
        match catalog.resolution(&self.bundle) {
            Resolution::Matched(entry) => update_from_entry(entry, &self.bundle),
            Resolution::Ambiguous => Err(CheckError::AmbiguousMatch(self.bundle.file_name())),
            Resolution::Excluded | Resolution::NoMatch => {
                Err(CheckError::NotFound(self.bundle.file_name()))
            }
        }
    }
}

fn update_from_entry(entry: &CatalogEntry, bundle: &Bundle) -> Result<Update> {
    let Some(remote_version) = entry.remote_version() else {
        return Err(CheckError::NotFound(bundle.file_name()));
    };
    let mut update = Update::new(
        remote_version,
        Source::PackageCask,
        UpdateAction::External {
            mechanism: MECHANISM.to_string(),
            locator: Some(format!("brew upgrade --cask {}", entry.token)),
        },
    );
    update.minimum_os = entry
        .minimum_os
        .as_ref()
        .map(Version::from_version)
        .filter(|version| !version.is_empty());
    Ok(update)
}
