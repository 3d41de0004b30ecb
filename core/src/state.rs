//! The collection of known apps and their latest check results.
//!
//! Every mutation goes through one mutex and schedules a debounced
//! notification: at most one publication per debounce window, carrying the
//! snapshot as it is when the window closes. Publishing also records which
//! identifiers currently look updatable so the next session can mark them
//! pending before their first check completes.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

use crate::error::CheckError;
use crate::error::PreferenceError;
use crate::model::Bundle;
use crate::model::Update;
use crate::preferences::PreferenceStore;
use crate::version::Version;

pub const DEFAULT_NOTIFY_DEBOUNCE: Duration = Duration::from_millis(600);

/// A bundle together with what is known about its updates.
#[derive(Debug, Clone)]
pub struct App {
    pub bundle: Bundle,
    pub result: Option<Result<Update, CheckError>>,
    pub ignored: bool,
    /// Recorded as updatable last session and not checked yet in this one.
    pub pending_check: bool,
}

impl App {
    fn new(bundle: Bundle, ignored: bool, pending_check: bool) -> Self {
        Self {
            bundle,
            result: None,
            ignored,
            pending_check,
        }
    }

    pub fn path(&self) -> &Path {
        self.bundle.path()
    }

    pub fn update(&self) -> Option<&Update> {
        self.result.as_ref().and_then(|result| result.as_ref().ok())
    }

    pub fn error(&self) -> Option<&CheckError> {
        self.result.as_ref().and_then(|result| result.as_ref().err())
    }

    pub fn has_update(&self, os_version: Option<&Version>) -> bool {
        self.update()
            .is_some_and(|update| update.is_available(&self.bundle.version, os_version))
    }

    /// Not ignored, and either a newer version is known or one is expected.
    pub fn is_updatable(&self, os_version: Option<&Version>) -> bool {
        !self.ignored && (self.pending_check || self.has_update(os_version))
    }
}

/// Same path and same installed version.
impl PartialEq for App {
    fn eq(&self, other: &Self) -> bool {
        self.bundle.same_identity(&other.bundle) && self.bundle.version == other.bundle.version
    }
}

#[derive(Default)]
struct StoreInner {
    apps: Vec<App>,
    notify_pending: bool,
}

pub struct AppStateStore {
    inner: Mutex<StoreInner>,
    prefs: Arc<dyn PreferenceStore>,
    debounce: Duration,
    os_version: Option<Version>,
    published: watch::Sender<Arc<Vec<App>>>,
}

impl AppStateStore {
    pub fn new(
        prefs: Arc<dyn PreferenceStore>,
        debounce: Duration,
        os_version: Option<Version>,
    ) -> Arc<Self> {
        let (published, _) = watch::channel(Arc::new(Vec::new()));
        Arc::new(Self {
            inner: Mutex::new(StoreInner::default()),
            prefs,
            debounce,
            os_version,
            published,
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn os_version(&self) -> Option<&Version> {
        self.os_version.as_ref()
    }

    /// Receives each debounced snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<App>>> {
        self.published.subscribe()
    }

    pub fn snapshot(&self) -> Vec<App> {
        self.lock().apps.clone()
    }

    pub fn app(&self, path: &Path) -> Option<App> {
        self.lock()
            .apps
            .iter()
            .find(|app| app.path() == path)
            .cloned()
    }

    pub fn updatable_apps(&self) -> Vec<App> {
        let os_version = self.os_version.as_ref();
        self.lock()
            .apps
            .iter()
            .filter(|app| app.is_updatable(os_version))
            .cloned()
            .collect()
    }

    /// Replaces the bundle list. Apps already known keep their result and
    /// flags; new ones start from the persisted preferences.
    pub fn set_bundles(self: &Arc<Self>, bundles: Vec<Bundle>) {
        let ignored = self.prefs.ignored_identifiers();
        let updatable = self.prefs.updatable_identifiers();
        {
            let mut inner = self.lock();
            let mut previous: HashMap<PathBuf, App> = inner
                .apps
                .drain(..)
                .map(|app| (app.bundle.path.clone(), app))
                .collect();
            let mut seen = HashSet::new();
            inner.apps = bundles
                .into_iter()
                .filter(|bundle| seen.insert(bundle.path.clone()))
                .map(|bundle| match previous.remove(&bundle.path) {
                    Some(existing) => App { bundle, ..existing },
                    None => {
                        let is_ignored = ignored.contains(&bundle.identifier);
                        let pending = bundle.source.is_checkable()
                            && updatable.contains(&bundle.identifier);
                        App::new(bundle, is_ignored, pending)
                    }
                })
                .collect();
            debug!(apps = inner.apps.len(), "bundle list replaced");
        }
        self.schedule_notify();
    }

    /// Records a check result. Results for bundles no longer known are
    /// dropped.
    pub fn set_result(self: &Arc<Self>, bundle: &Bundle, result: Result<Update, CheckError>) {
        {
            let mut inner = self.lock();
            let Some(slot) = inner.apps.iter_mut().find(|app| app.bundle.same_identity(bundle))
            else {
                debug!(path = %bundle.path.display(), "dropping result for unknown bundle");
                return;
            };
            *slot = App {
                bundle: slot.bundle.clone(),
                result: Some(result),
                ignored: slot.ignored,
                pending_check: false,
            };
        }
        self.schedule_notify();
    }

    /// Persists the ignore flag for the app at `path` and updates it.
    pub fn set_ignored(self: &Arc<Self>, path: &Path, ignored: bool) -> Result<(), PreferenceError> {
        let identifier = {
            let inner = self.lock();
            inner
                .apps
                .iter()
                .find(|app| app.path() == path)
                .map(|app| app.bundle.identifier.clone())
        };
        let Some(identifier) = identifier else {
            return Ok(());
        };
        self.prefs.set_ignored(&identifier, ignored)?;
        {
            let mut inner = self.lock();
            if let Some(slot) = inner.apps.iter_mut().find(|app| app.path() == path) {
                *slot = App {
                    ignored,
                    ..slot.clone()
                };
            }
        }
        self.schedule_notify();
        Ok(())
    }

    fn schedule_notify(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            if inner.notify_pending {
                return;
            }
            inner.notify_pending = true;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(self);
                handle.spawn(async move {
                    tokio::time::sleep(store.debounce).await;
                    store.publish();
                });
            }
            Err(_) => self.publish(),
        }
    }

    /// Publishes the current snapshot immediately, e.g. before shutdown.
    pub fn publish(&self) {
        let (snapshot, updatable) = {
            let mut inner = self.lock();
            inner.notify_pending = false;
            let os_version = self.os_version.as_ref();
            let updatable: HashSet<String> = inner
                .apps
                .iter()
                .filter(|app| app.pending_check || app.has_update(os_version))
                .map(|app| app.bundle.identifier.clone())
                .collect();
            (Arc::new(inner.apps.clone()), updatable)
        };
        if let Err(err) = self.prefs.set_updatable_identifiers(updatable) {
            warn!(error = %err, "failed to record updatable apps");
        }
        self.published.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;
    use crate::model::UpdateAction;
    use crate::preferences::PreferenceFile;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    fn bundle(name: &str, version: &str) -> Bundle {
        Bundle::new(
            format!("/Applications/{name}.app"),
            name,
            format!("com.example.{}", name.to_lowercase()),
            Version::from_version(version),
            Source::PackageCask,
        )
    }

    fn update(version: &str) -> Update {
        Update::new(
            Version::from_version(version),
            Source::PackageCask,
            UpdateAction::External {
                mechanism: "package cask".to_string(),
                locator: None,
            },
        )
    }

    fn store(prefs: &Arc<PreferenceFile>) -> Arc<AppStateStore> {
        let prefs: Arc<dyn PreferenceStore> = prefs.clone();
        AppStateStore::new(prefs, DEFAULT_NOTIFY_DEBOUNCE, None)
    }

    #[tokio::test(start_paused = true)]
    async fn previously_updatable_bundle_is_pending_until_checked() {
        let prefs = Arc::new(PreferenceFile::in_memory());
        prefs
            .set_updatable_identifiers(HashSet::from(["com.example.alpha".to_string()]))
            .expect("prefs");
        let store = store(&prefs);

        let alpha = bundle("Alpha", "1.0");
        store.set_bundles(vec![alpha.clone(), bundle("Beta", "1.0")]);

        let app = store.app(alpha.path()).expect("alpha");
        assert!(app.pending_check);
        assert_eq!(store.updatable_apps().len(), 1);
        assert!(!store.app(Path::new("/Applications/Beta.app")).expect("beta").pending_check);

        store.set_result(&alpha, Err(CheckError::NotFound("Alpha".into())));
        let app = store.app(alpha.path()).expect("alpha");
        assert!(!app.pending_check);
        assert!(store.updatable_apps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_are_debounced() {
        let prefs = Arc::new(PreferenceFile::in_memory());
        let store = store(&prefs);
        let mut rx = store.subscribe();
        let alpha = bundle("Alpha", "1.0");

        let start = Instant::now();
        store.set_bundles(vec![alpha.clone()]);
        store.set_result(&alpha, Ok(update("2.0")));

        rx.changed().await.expect("published");
        assert!(start.elapsed() >= DEFAULT_NOTIFY_DEBOUNCE);
        let published = rx.borrow_and_update().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].update(), Some(&update("2.0")));
        assert!(!rx.has_changed().expect("open"));

        assert_eq!(
            prefs.updatable_identifiers(),
            HashSet::from(["com.example.alpha".to_string()])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rescan_carries_state_forward() {
        let prefs = Arc::new(PreferenceFile::in_memory());
        prefs.set_ignored("com.example.beta", true).expect("prefs");
        let store = store(&prefs);
        let alpha = bundle("Alpha", "1.0");
        store.set_bundles(vec![alpha.clone(), bundle("Beta", "1.0")]);
        store.set_result(&alpha, Ok(update("2.0")));
        assert!(store.app(Path::new("/Applications/Beta.app")).expect("beta").ignored);

        // Alpha was upgraded externally; Beta was removed.
        let upgraded = bundle("Alpha", "2.0");
        store.set_bundles(vec![upgraded.clone(), upgraded.clone()]);

        let apps = store.snapshot();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].bundle.version, Version::from_version("2.0"));
        assert_eq!(apps[0].update(), Some(&update("2.0")));
        assert!(!apps[0].has_update(None));
        assert_ne!(
            apps[0],
            App::new(alpha, false, false),
            "installed version differs"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ignoring_persists_and_hides_update() {
        let prefs = Arc::new(PreferenceFile::in_memory());
        let store = store(&prefs);
        let alpha = bundle("Alpha", "1.0");
        store.set_bundles(vec![alpha.clone()]);
        store.set_result(&alpha, Ok(update("2.0")));
        assert_eq!(store.updatable_apps().len(), 1);

        store.set_ignored(alpha.path(), true).expect("ignore");
        assert!(store.updatable_apps().is_empty());
        assert!(prefs.ignored_identifiers().contains("com.example.alpha"));

        store.set_ignored(alpha.path(), false).expect("unignore");
        assert_eq!(store.updatable_apps().len(), 1);
        assert!(prefs.ignored_identifiers().is_empty());
    }

    #[test]
    fn publishes_immediately_outside_a_runtime() {
        let prefs = Arc::new(PreferenceFile::in_memory());
        let store = store(&prefs);
        let rx = store.subscribe();
        store.set_bundles(vec![bundle("Alpha", "1.0")]);
        assert_eq!(rx.borrow().len(), 1);
    }
}
