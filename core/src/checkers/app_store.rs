use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;

use crate::error::Result;
use crate::lookup::AppStoreEntry;
use crate::lookup::LookupBatcher;
use crate::model::Bundle;
use crate::model::ReleaseNotes;
use crate::model::Source;
use crate::model::Update;
use crate::model::UpdateAction;
use crate::version::Version;

const MECHANISM: &str = "App Store";

pub struct AppStoreCheck {
    bundle: Bundle,
    batcher: Arc<LookupBatcher>,
    region: String,
}

impl AppStoreCheck {
    pub fn new(bundle: Bundle, batcher: Arc<LookupBatcher>, region: String) -> Self {
        Self {
            bundle,
            batcher,
            region,
        }
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub async fn execute(&self) -> Result<Update> {
        let identifier = &self.bundle.identifier;
        let entry = self
            .batcher
            .lookup(&self.region, identifier)
            .await
            .map_err(|err| err.into_check_error(identifier))?;
        Ok(update_from_entry(entry))
    }
}

fn update_from_entry(entry: AppStoreEntry) -> Update {
    let mut update = Update::new(
        Version::from_version(entry.version),
        Source::AppStore,
        UpdateAction::External {
            mechanism: MECHANISM.to_string(),
            locator: entry.track_view_url,
        },
    );
    update.minimum_os = entry
        .minimum_os_version
        .map(Version::from_version)
        .filter(|version| !version.is_empty());
    update.release_date = entry
        .current_version_release_date
        .and_then(|date| DateTime::parse_from_rfc3339(&date).ok())
        .map(|date| date.with_timezone(&Utc));
    update.release_notes = entry
        .release_notes
        .filter(|notes| !notes.trim().is_empty())
        .map(ReleaseNotes::Text);
    update
}
