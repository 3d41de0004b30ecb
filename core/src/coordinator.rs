//! Runs one update check per bundle with bounded concurrency.
//!
//! A run moves `Idle -> Scanning -> Checking -> Idle`. Only the first run
//! asks [`BundleDiscovery`] for bundles; later runs reuse the last list
//! (replaced through [`CheckCoordinator::set_bundles`] on rescans). Each
//! finished check is written to the [`AppStateStore`] before its progress
//! event is sent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tokio::sync::Semaphore;
use tokio::sync::broadcast;
use tokio::task;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::checkers::CheckContext;
use crate::checkers::UpdateCheck;
use crate::config::UptickConfig;
use crate::discovery::BundleDiscovery;
use crate::error::CheckError;
use crate::http::build_client;
use crate::job::StatefulJob;
use crate::lookup::AppStoreLookupClient;
use crate::lookup::LookupBatcher;
use crate::model::Bundle;
use crate::model::Source;
use crate::model::Update;
use crate::preferences::PreferenceStore;
use crate::repository::RepositoryLoader;
use crate::repository::RepositoryProvider;
use crate::repository::RepositorySources;
use crate::resource::ResourceFetcher;
use crate::state::AppStateStore;
use crate::version::Version;

pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 10;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Scanning,
    Checking { checked: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckEvent {
    Started,
    BundleChecked {
        path: PathBuf,
        checked: usize,
        total: usize,
    },
    Finished {
        checked: usize,
        total: usize,
    },
}

struct RunState {
    phase: CoordinatorState,
    bundles: Option<Vec<Bundle>>,
    cancel: Option<CancellationToken>,
}

pub struct CheckCoordinator {
    discovery: Arc<dyn BundleDiscovery>,
    store: Arc<AppStateStore>,
    context: CheckContext,
    repositories: Arc<dyn RepositoryProvider>,
    max_concurrent: usize,
    state: Mutex<RunState>,
    events: broadcast::Sender<CheckEvent>,
}

impl CheckCoordinator {
    /// `context` is the template for every run; the run's repository cache
    /// is attached to it when the run contains package-cask bundles.
    pub fn new(
        discovery: Arc<dyn BundleDiscovery>,
        store: Arc<AppStateStore>,
        context: CheckContext,
        repositories: Arc<dyn RepositoryProvider>,
        max_concurrent: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            discovery,
            store,
            context,
            repositories,
            max_concurrent: max_concurrent.max(1),
            state: Mutex::new(RunState {
                phase: CoordinatorState::Idle,
                bundles: None,
                cancel: None,
            }),
            events,
        }
    }

    /// Wires the production collaborators: one HTTP client, the app-store
    /// lookup batcher, the cached package catalog and a fresh state store.
    pub fn from_config(
        config: &UptickConfig,
        discovery: Arc<dyn BundleDiscovery>,
        prefs: Arc<dyn PreferenceStore>,
        os_version: Option<Version>,
    ) -> reqwest::Result<Self> {
        let client = build_client(config)?;
        let transport = Arc::new(AppStoreLookupClient::new(client.clone(), &config.lookup_url));
        let batcher = LookupBatcher::from_config(transport, config);
        let fetcher = Arc::new(ResourceFetcher::from_config(
            client.clone(),
            config,
            Arc::clone(&prefs),
        ));
        let repositories = Arc::new(RepositoryLoader::new(
            fetcher,
            RepositorySources::from_config(config),
        ));
        let store = AppStateStore::new(prefs, config.notify_debounce(), os_version);
        let context =
            CheckContext::new(client, batcher, &config.region).with_locale(config.locale.clone());
        Ok(Self::new(
            discovery,
            store,
            context,
            repositories,
            config.max_concurrent_checks,
        ))
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CoordinatorState {
        self.lock().phase
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<AppStateStore> {
        &self.store
    }

    /// Replaces the known bundles, e.g. after an external rescan.
    pub fn set_bundles(&self, bundles: Vec<Bundle>) {
        self.lock().bundles = Some(bundles.clone());
        self.store.set_bundles(bundles);
    }

    /// Cancels every check of the run in progress. Their results are
    /// recorded as cancelled and the run still finishes normally.
    pub fn cancel(&self) {
        if let Some(token) = &self.lock().cancel {
            info!("cancelling check run");
            token.cancel();
        }
    }

    fn emit(&self, event: CheckEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Runs one pass over all bundles. A call made while a pass is in
    /// progress only re-announces it. Dropping the returned future ends the
    /// pass; the next call starts a fresh one.
    pub async fn run(&self) {
        let (known, run_token) = {
            let mut state = self.lock();
            if state.phase != CoordinatorState::Idle {
                drop(state);
                self.emit(CheckEvent::Started);
                return;
            }
            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            state.phase = CoordinatorState::Scanning;
            (state.bundles.clone(), token)
        };
        let guard = ResetOnDrop(self);
        self.emit(CheckEvent::Started);

        let bundles = match known {
            Some(bundles) => bundles,
            None => {
                let discovered = match self.discovery.discover().await {
                    Ok(bundles) => bundles,
                    Err(err) => {
                        warn!(error = %err, "bundle discovery failed");
                        Vec::new()
                    }
                };
                info!(count = discovered.len(), "bundles discovered");
                self.lock().bundles = Some(discovered.clone());
                self.store.set_bundles(discovered.clone());
                discovered
            }
        };

        let (checked, total) = self.check_all(&bundles, &run_token).await;
        drop(guard);
        info!(checked, total, "check run finished");
        self.emit(CheckEvent::Finished { checked, total });
    }

    async fn check_all(&self, bundles: &[Bundle], run_token: &CancellationToken) -> (usize, usize) {
        let mut context = self.context.clone();
        if bundles
            .iter()
            .any(|bundle| bundle.source == Source::PackageCask)
        {
            context = context.with_repository(self.repositories.load());
        }

        let checks: Vec<UpdateCheck> = bundles
            .iter()
            .filter_map(|bundle| UpdateCheck::for_bundle(bundle, &context))
            .collect();
        let total = checks.len();
        self.lock().phase = CoordinatorState::Checking { checked: 0, total };
        debug!(total, "starting update checks");

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut jobs = JoinSet::new();
        let mut tasks = HashMap::with_capacity(total);
        for check in checks {
            let permits = Arc::clone(&permits);
            let bundle = check.bundle().clone();
            let job = StatefulJob::<Update>::with_token(run_token.child_token());
            let handle = jobs.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                job.run(|job| async move { check.execute(job.cancellation_token()).await })
                    .await
            });
            tasks.insert(handle.id(), bundle);
        }

        let checked = self.collect(jobs, tasks, total).await;
        (checked, total)
    }

    /// Records every finished check, in completion order. A task that died
    /// without a result is recorded as unavailable.
    async fn collect(
        &self,
        mut jobs: JoinSet<Result<Update, CheckError>>,
        mut tasks: HashMap<task::Id, Bundle>,
        total: usize,
    ) -> usize {
        let mut checked = 0;
        while let Some(joined) = jobs.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(err) => {
                    warn!(error = %err, "check task failed");
                    let message = format!("check task failed: {err}");
                    (err.id(), Err(CheckError::Unavailable(message)))
                }
            };
            let Some(bundle) = tasks.remove(&id) else {
                continue;
            };
            checked += 1;
            if let Err(err) = &result {
                debug!(bundle = %bundle.identifier, error = %err, "check failed");
            }
            self.store.set_result(&bundle, result);
            self.lock().phase = CoordinatorState::Checking { checked, total };
            self.emit(CheckEvent::BundleChecked {
                path: bundle.path.clone(),
                checked,
                total,
            });
        }
        checked
    }
}

/// Returns the coordinator to `Idle` when a pass ends, including when the
/// future driving it is dropped.
struct ResetOnDrop<'a>(&'a CheckCoordinator);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.phase = CoordinatorState::Idle;
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
    }
}
