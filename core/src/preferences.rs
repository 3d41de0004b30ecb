//! Small persisted key/value state: the ignore list, the identifiers known to
//! have had an update in the previous session, and last-fetch timestamps of
//! cached remote resources.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::error::PreferenceError;

pub trait PreferenceStore: Send + Sync {
    fn ignored_identifiers(&self) -> HashSet<String>;

    fn set_ignored(&self, identifier: &str, ignored: bool) -> Result<(), PreferenceError>;

    fn updatable_identifiers(&self) -> HashSet<String>;

    fn set_updatable_identifiers(
        &self,
        identifiers: HashSet<String>,
    ) -> Result<(), PreferenceError>;

    fn last_fetch(&self, resource: &str) -> Option<DateTime<Utc>>;

    fn set_last_fetch(&self, resource: &str, at: DateTime<Utc>) -> Result<(), PreferenceError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
struct Preferences {
    ignored: BTreeSet<String>,
    updatable: BTreeSet<String>,
    last_fetch: BTreeMap<String, DateTime<Utc>>,
}

/// JSON-file backed store. Without a path it only lives in memory.
#[derive(Debug)]
pub struct PreferenceFile {
    path: Option<PathBuf>,
    inner: Mutex<Preferences>,
}

impl PreferenceFile {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Preferences::default()),
        }
    }

    /// Opens `path`, starting empty when it does not exist yet. A corrupt file
    /// is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PreferenceError> {
        let path = path.into();
        let prefs = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(prefs) => prefs,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "discarding unreadable preferences");
                    Preferences::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Preferences::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(prefs),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Preferences> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, apply: impl FnOnce(&mut Preferences)) -> Result<(), PreferenceError> {
        let mut prefs = self.lock();
        apply(&mut prefs);
        match &self.path {
            Some(path) => persist(path, &prefs),
            None => Ok(()),
        }
    }
}

fn persist(path: &Path, prefs: &Preferences) -> Result<(), PreferenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(prefs)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl PreferenceStore for PreferenceFile {
    fn ignored_identifiers(&self) -> HashSet<String> {
        self.lock().ignored.iter().cloned().collect()
    }

    fn set_ignored(&self, identifier: &str, ignored: bool) -> Result<(), PreferenceError> {
        self.update(|prefs| {
            if ignored {
                prefs.ignored.insert(identifier.to_string());
            } else {
                prefs.ignored.remove(identifier);
            }
        })
    }

    fn updatable_identifiers(&self) -> HashSet<String> {
        self.lock().updatable.iter().cloned().collect()
    }

    fn set_updatable_identifiers(
        &self,
        identifiers: HashSet<String>,
    ) -> Result<(), PreferenceError> {
        self.update(|prefs| prefs.updatable = identifiers.into_iter().collect())
    }

    fn last_fetch(&self, resource: &str) -> Option<DateTime<Utc>> {
        self.lock().last_fetch.get(resource).copied()
    }

    fn set_last_fetch(&self, resource: &str, at: DateTime<Utc>) -> Result<(), PreferenceError> {
        self.update(|prefs| {
            prefs.last_fetch.insert(resource.to_string(), at);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("preferences.json");
        let now = Utc::now();
        {
            let store = PreferenceFile::open(&path).expect("open");
            store.set_ignored("com.example.a", true).expect("ignore");
            store.set_ignored("com.example.b", true).expect("ignore");
            store.set_ignored("com.example.b", false).expect("unignore");
            store
                .set_updatable_identifiers(HashSet::from(["com.example.c".to_string()]))
                .expect("updatable");
            store.set_last_fetch("catalog", now).expect("timestamp");
        }

        let reopened = PreferenceFile::open(&path).expect("reopen");
        assert_eq!(
            reopened.ignored_identifiers(),
            HashSet::from(["com.example.a".to_string()])
        );
        assert_eq!(
            reopened.updatable_identifiers(),
            HashSet::from(["com.example.c".to_string()])
        );
        assert_eq!(reopened.last_fetch("catalog"), Some(now));
        assert_eq!(reopened.last_fetch("exclusions"), None);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("preferences.json");
        std::fs::write(&path, b"{not json").expect("write");
        let store = PreferenceFile::open(&path).expect("open");
        assert!(store.ignored_identifiers().is_empty());
    }
}
