use std::hash::Hash;
use std::hash::Hasher;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::version::Version;

const APP_SUFFIX: &str = ".app";

/// Which mechanism is authoritative for a bundle's updates. Decided once at
/// discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    None,
    VendorFeed,
    AppStore,
    PackageCask,
}

impl Source {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Source::None => "none",
            Source::VendorFeed => "vendor feed",
            Source::AppStore => "app store",
            Source::PackageCask => "package cask",
        }
    }

    pub fn is_checkable(self) -> bool {
        self != Source::None
    }
}

/// An installed application. Identity is its path on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub path: PathBuf,
    pub name: String,
    pub identifier: String,
    pub version: Version,
    pub modified: Option<DateTime<Utc>>,
    pub source: Source,
    /// Vendor appcast location, when the bundle declares one.
    pub feed_url: Option<String>,
}

impl Bundle {
    pub fn new(
        path: impl Into<PathBuf>,
        name: impl Into<String>,
        identifier: impl Into<String>,
        version: Version,
        source: Source,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            identifier: identifier.into(),
            version,
            modified: None,
            source,
            feed_url: None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_feed_url(mut self, feed_url: impl Into<String>) -> Self {
        self.feed_url = Some(feed_url.into());
        self
    }

    #[must_use]
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// File name including the extension, e.g. `Example.app`.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    /// File name without the extension, e.g. `Example`.
    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn same_identity(&self, other: &Bundle) -> bool {
        self.path == other.path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartialEq for Bundle {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(other)
    }
}

impl Eq for Bundle {}

impl Hash for Bundle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Adds or strips the `.app` suffix.
pub(crate) fn toggle_app_suffix(name: &str) -> String {
    match strip_app_suffix(name) {
        Some(stem) => stem.to_string(),
        None => format!("{name}{APP_SUFFIX}"),
    }
}

pub(crate) fn strip_app_suffix(name: &str) -> Option<&str> {
    let len = name.len();
    if len > APP_SUFFIX.len() && name.is_char_boundary(len - APP_SUFFIX.len()) {
        let (stem, suffix) = name.split_at(len - APP_SUFFIX.len());
        if suffix.eq_ignore_ascii_case(APP_SUFFIX) {
            return Some(stem);
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ReleaseNotes {
    Url(String),
    Html(String),
    Text(String),
}

/// How an update is applied. Applying it is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdateAction {
    /// The checker's own mechanism can install the update.
    BuiltIn { download_url: Option<String> },
    /// The user has to go through a named external mechanism.
    External {
        mechanism: String,
        locator: Option<String>,
    },
}

/// Result of one successful check for one bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub remote_version: Version,
    pub minimum_os: Option<Version>,
    pub source: Source,
    pub release_date: Option<DateTime<Utc>>,
    pub release_notes: Option<ReleaseNotes>,
    pub action: UpdateAction,
}

impl Update {
    pub fn new(remote_version: Version, source: Source, action: UpdateAction) -> Self {
        Self {
            remote_version,
            minimum_os: None,
            source,
            release_date: None,
            release_notes: None,
            action,
        }
    }

    /// True when the remote version is newer than `installed` and the local
    /// OS (if known) satisfies the minimum requirement.
    pub fn is_available(&self, installed: &Version, os_version: Option<&Version>) -> bool {
        self.remote_version > *installed && self.supports_os(os_version)
    }

    pub fn supports_os(&self, os_version: Option<&Version>) -> bool {
        match (&self.minimum_os, os_version) {
            (Some(minimum), Some(local)) => local >= minimum,
            _ => true,
        }
    }
}

/// Two updates are the same release when version and date agree; notes and
/// actions are not compared.
impl PartialEq for Update {
    fn eq(&self, other: &Self) -> bool {
        self.remote_version == other.remote_version && self.release_date == other.release_date
    }
}
