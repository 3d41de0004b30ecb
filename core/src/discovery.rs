//! Finding installed application bundles.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use plist::Dictionary;
use plist::Value;
use tracing::debug;
use tracing::warn;

use crate::error::DiscoveryError;
use crate::model::Bundle;
use crate::model::Source;
use crate::model::strip_app_suffix;
use crate::version::Version;

#[async_trait]
pub trait BundleDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<Bundle>, DiscoveryError>;
}

/// Scans application directories for `.app` bundles, descending one level
/// into plain folders such as `Utilities`.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    dirs: Vec<PathBuf>,
}

impl DirectoryScanner {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    fn scan(&self) -> Vec<Bundle> {
        let mut bundles = Vec::new();
        for dir in &self.dirs {
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "skipping missing application directory");
                continue;
            }
            if let Err(err) = scan_dir(dir, 1, &mut bundles) {
                warn!(error = %err, "application directory skipped");
            }
        }
        bundles.sort_by_key(|bundle| bundle.name.to_lowercase());
        bundles
    }
}

#[async_trait]
impl BundleDiscovery for DirectoryScanner {
    async fn discover(&self) -> Result<Vec<Bundle>, DiscoveryError> {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|err| DiscoveryError::ReadDir {
                path: PathBuf::new(),
                source: std::io::Error::other(err),
            })
    }
}

fn scan_dir(dir: &Path, depth: usize, bundles: &mut Vec<Bundle>) -> Result<(), DiscoveryError> {
    let entries = fs::read_dir(dir).map_err(|source| DiscoveryError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let is_bundle = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(strip_app_suffix)
            .is_some();
        if is_bundle {
            match read_bundle(&path) {
                Ok(Some(bundle)) => bundles.push(bundle),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "unreadable bundle"),
            }
        } else if depth > 0 {
            if let Err(err) = scan_dir(&path, depth - 1, bundles) {
                debug!(error = %err, "skipping folder");
            }
        }
    }
    Ok(())
}

/// Reads `Contents/Info.plist`. Bundles without one are ignored.
pub fn read_bundle(path: &Path) -> Result<Option<Bundle>, DiscoveryError> {
    let contents = path.join("Contents");
    let info_path = contents.join("Info.plist");
    if !info_path.exists() {
        return Ok(None);
    }
    let info = Value::from_file(&info_path).map_err(|source| DiscoveryError::Plist {
        path: info_path.clone(),
        source,
    })?;
    let Some(dict) = info.as_dictionary() else {
        return Ok(None);
    };

    let identifier = string(dict, "CFBundleIdentifier").unwrap_or_default();
    let name = string(dict, "CFBundleDisplayName")
        .or_else(|| string(dict, "CFBundleName"))
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    let version = Version::new(
        string(dict, "CFBundleShortVersionString"),
        string(dict, "CFBundleVersion"),
    );
    let feed_url = string(dict, "SUFeedURL");

    let source = if contents.join("_MASReceipt").join("receipt").is_file() {
        Source::AppStore
    } else if feed_url.is_some() {
        Source::VendorFeed
    } else if identifier.is_empty() {
        Source::None
    } else {
        Source::PackageCask
    };

    let mut bundle = Bundle::new(path, name, identifier, version, source);
    if let Some(url) = feed_url {
        bundle = bundle.with_feed_url(url);
    }
    if let Ok(modified) = fs::metadata(path).and_then(|meta| meta.modified()) {
        bundle = bundle.with_modified(DateTime::<Utc>::from(modified));
    }
    Ok(Some(bundle))
}

fn string(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key)
        .and_then(Value::as_string)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}
