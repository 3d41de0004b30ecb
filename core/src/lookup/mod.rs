//! Coalesces app-store lookups.
//!
//! Requests are keyed by `(region, identifier)`. A request for a key that was
//! already resolved is answered from the cache. Everything else waits for the
//! next flush, which runs a fixed delay after the first uncached request and
//! turns all waiting keys into as few outbound calls as the chunk size allows.
//! Results (successes and failures alike) are cached for the lifetime of the
//! batcher.

mod client;

pub use client::AppStoreEntry;
pub use client::AppStoreLookupClient;
pub use client::Entity;
pub use client::LookupTransport;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::config::UptickConfig;
use crate::error::LookupError;

pub const DEFAULT_COALESCING_DELAY: Duration = Duration::from_millis(40);
pub const DEFAULT_CHUNK_SIZE: usize = 50;

type Key = (String, String);
type Outcome = Result<AppStoreEntry, LookupError>;

#[derive(Default)]
struct BatchState {
    cache: HashMap<Key, Outcome>,
    pending: HashMap<Key, Vec<oneshot::Sender<Outcome>>>,
    in_flight: HashSet<Key>,
    flush_scheduled: bool,
}

pub struct LookupBatcher {
    transport: Arc<dyn LookupTransport>,
    state: Mutex<BatchState>,
    delay: Duration,
    chunk_size: usize,
}

impl LookupBatcher {
    pub fn new(transport: Arc<dyn LookupTransport>, delay: Duration, chunk_size: usize) -> Arc<Self> {
        Arc::new(Self {
            transport,
            state: Mutex::new(BatchState::default()),
            delay,
            chunk_size: chunk_size.max(1),
        })
    }

    pub fn from_config(transport: Arc<dyn LookupTransport>, config: &UptickConfig) -> Arc<Self> {
        Self::new(transport, config.coalescing_delay(), config.lookup_chunk_size)
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached outcome for a key, if it has been resolved.
    pub fn cached(&self, region: &str, identifier: &str) -> Option<Outcome> {
        self.lock()
            .cache
            .get(&(region.to_string(), identifier.to_string()))
            .cloned()
    }

    pub async fn lookup(self: &Arc<Self>, region: &str, identifier: &str) -> Outcome {
        let key = (region.to_string(), identifier.to_string());
        let receiver = {
            let mut state = self.lock();
            if let Some(outcome) = state.cache.get(&key) {
                return outcome.clone();
            }
            let (tx, rx) = oneshot::channel();
            state.pending.entry(key).or_default().push(tx);
            if !state.flush_scheduled {
                state.flush_scheduled = true;
                let batcher = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(batcher.delay).await;
                    batcher.flush().await;
                });
            }
            rx
        };
        receiver
            .await
            .unwrap_or(Err(LookupError::ResultUnavailable))
    }

    async fn flush(self: Arc<Self>) {
        let by_region = {
            let mut state = self.lock();
            state.flush_scheduled = false;
            let ready: Vec<Key> = state
                .pending
                .keys()
                .filter(|key| !state.in_flight.contains(*key))
                .cloned()
                .collect();
            let mut by_region: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for key in ready {
                state.in_flight.insert(key.clone());
                by_region.entry(key.0).or_default().push(key.1);
            }
            by_region
        };

        for (region, mut identifiers) in by_region {
            identifiers.sort();
            for chunk in identifiers.chunks(self.chunk_size) {
                let batcher = Arc::clone(&self);
                let region = region.clone();
                let chunk = chunk.to_vec();
                tokio::spawn(async move {
                    let outcomes = batcher.resolve_chunk(&region, &chunk).await;
                    batcher.complete(&region, outcomes);
                });
            }
        }
    }

    async fn resolve_chunk(&self, region: &str, identifiers: &[String]) -> Vec<(String, Outcome)> {
        debug!(region, count = identifiers.len(), "flushing lookup chunk");
        let mut found: HashMap<String, AppStoreEntry> = match self
            .transport
            .lookup(region, identifiers, Entity::Narrow)
            .await
        {
            Ok(entries) => entries
                .into_iter()
                .map(|entry| (entry.bundle_id.clone(), entry))
                .collect(),
            Err(err) => {
                return identifiers
                    .iter()
                    .map(|identifier| (identifier.clone(), Err(err.clone())))
                    .collect();
            }
        };

        let missing: Vec<String> = identifiers
            .iter()
            .filter(|identifier| !found.contains_key(*identifier))
            .cloned()
            .collect();
        let mut broad_error = None;
        if !missing.is_empty() {
            match self.transport.lookup(region, &missing, Entity::Broad).await {
                Ok(entries) => {
                    for entry in entries {
                        if missing.contains(&entry.bundle_id) {
                            found.entry(entry.bundle_id.clone()).or_insert(entry);
                        }
                    }
                }
                Err(err) => {
                    debug!(region, error = %err, "broad lookup failed");
                    broad_error = Some(err);
                }
            }
        }

        identifiers
            .iter()
            .map(|identifier| {
                let outcome = match found.remove(identifier) {
                    Some(entry) => Ok(entry),
                    None => Err(broad_error
                        .clone()
                        .unwrap_or(LookupError::ResultUnavailable)),
                };
                (identifier.clone(), outcome)
            })
            .collect()
    }

    fn complete(&self, region: &str, outcomes: Vec<(String, Outcome)>) {
        let mut deliveries = Vec::with_capacity(outcomes.len());
        {
            let mut state = self.lock();
            for (identifier, outcome) in outcomes {
                let key = (region.to_string(), identifier);
                state.in_flight.remove(&key);
                let waiters = state.pending.remove(&key).unwrap_or_default();
                state.cache.insert(key, outcome.clone());
                deliveries.push((waiters, outcome));
            }
        }
        for (waiters, outcome) in deliveries {
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    type Call = (String, Vec<String>, Entity);

    #[derive(Default)]
    struct FakeTransport {
        calls: Mutex<Vec<Call>>,
        narrow: HashSet<String>,
        broad: HashSet<String>,
        narrow_error: Option<LookupError>,
        broad_error: Option<LookupError>,
    }

    impl FakeTransport {
        fn knowing(narrow: &[&str], broad: &[&str]) -> Self {
            Self {
                narrow: narrow.iter().map(ToString::to_string).collect(),
                broad: broad.iter().map(ToString::to_string).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn entry(identifier: &str) -> AppStoreEntry {
        AppStoreEntry {
            bundle_id: identifier.to_string(),
            version: "2.0".to_string(),
            minimum_os_version: None,
            current_version_release_date: None,
            release_notes: None,
            track_view_url: None,
        }
    }

    #[async_trait]
    impl LookupTransport for FakeTransport {
        async fn lookup(
            &self,
            region: &str,
            identifiers: &[String],
            entity: Entity,
        ) -> Result<Vec<AppStoreEntry>, LookupError> {
            self.calls
                .lock()
                .unwrap()
                .push((region.to_string(), identifiers.to_vec(), entity));
            let (known, error) = match entity {
                Entity::Narrow => (&self.narrow, &self.narrow_error),
                Entity::Broad => (&self.broad, &self.broad_error),
            };
            if let Some(err) = error {
                return Err(err.clone());
            }
            Ok(identifiers
                .iter()
                .filter(|identifier| known.contains(*identifier))
                .map(|identifier| entry(identifier.as_str()))
                .collect())
        }
    }

    fn batcher(transport: &Arc<FakeTransport>, chunk_size: usize) -> Arc<LookupBatcher> {
        let transport: Arc<dyn LookupTransport> = transport.clone();
        LookupBatcher::new(transport, DEFAULT_COALESCING_DELAY, chunk_size)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_for_one_key_share_a_call() {
        let transport = Arc::new(FakeTransport::knowing(&["com.a"], &[]));
        let batcher = batcher(&transport, DEFAULT_CHUNK_SIZE);

        let (a, b, c) = tokio::join!(
            batcher.lookup("us", "com.a"),
            batcher.lookup("us", "com.a"),
            batcher.lookup("us", "com.a"),
        );
        assert_eq!(a, Ok(entry("com.a")));
        assert_eq!(b, a);
        assert_eq!(c, a);
        assert_eq!(transport.calls().len(), 1);

        // Served from the cache without another call.
        assert_eq!(batcher.lookup("us", "com.a").await, Ok(entry("com.a")));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_chunked_and_grouped_by_region() {
        let transport = Arc::new(FakeTransport::knowing(&["a", "b", "c", "d", "e"], &[]));
        let batcher = batcher(&transport, 2);

        let results = tokio::join!(
            batcher.lookup("us", "a"),
            batcher.lookup("us", "b"),
            batcher.lookup("us", "c"),
            batcher.lookup("us", "d"),
            batcher.lookup("de", "e"),
        );
        assert!(results.0.is_ok() && results.3.is_ok() && results.4.is_ok());

        let mut calls = transport.calls();
        calls.sort_by_key(|call| (call.0.clone(), call.1.clone()));
        assert_eq!(
            calls,
            vec![
                ("de".to_string(), vec!["e".to_string()], Entity::Narrow),
                ("us".to_string(), vec!["a".to_string(), "b".to_string()], Entity::Narrow),
                ("us".to_string(), vec!["c".to_string(), "d".to_string()], Entity::Narrow),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_keys_retry_with_broad_entity() {
        let transport = Arc::new(FakeTransport::knowing(&["a"], &["b"]));
        let batcher = batcher(&transport, DEFAULT_CHUNK_SIZE);

        let (a, b, c) = tokio::join!(
            batcher.lookup("us", "a"),
            batcher.lookup("us", "b"),
            batcher.lookup("us", "c"),
        );
        assert_eq!(a, Ok(entry("a")));
        assert_eq!(b, Ok(entry("b")));
        assert_eq!(c, Err(LookupError::ResultUnavailable));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(calls[1].2, Entity::Broad);

        // Failures are cached too.
        assert_eq!(
            batcher.cached("us", "c"),
            Some(Err(LookupError::ResultUnavailable))
        );
        assert_eq!(batcher.lookup("us", "c").await, Err(LookupError::ResultUnavailable));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn narrow_failure_fails_the_whole_chunk() {
        let transport = Arc::new(FakeTransport {
            narrow_error: Some(LookupError::Status(500)),
            ..FakeTransport::knowing(&["a"], &["b"])
        });
        let batcher = batcher(&transport, DEFAULT_CHUNK_SIZE);

        let (a, b) = tokio::join!(batcher.lookup("us", "a"), batcher.lookup("us", "b"));
        assert_eq!(a, Err(LookupError::Status(500)));
        assert_eq!(b, Err(LookupError::Status(500)));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn broad_failure_fails_only_missing_keys() {
        let transport = Arc::new(FakeTransport {
            broad_error: Some(LookupError::Request("timeout".to_string())),
            ..FakeTransport::knowing(&["a"], &[])
        });
        let batcher = batcher(&transport, DEFAULT_CHUNK_SIZE);

        let (a, b) = tokio::join!(batcher.lookup("us", "a"), batcher.lookup("us", "b"));
        assert_eq!(a, Ok(entry("a")));
        assert_matches!(b, Err(LookupError::Request(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_in_separate_windows_flush_separately() {
        let transport = Arc::new(FakeTransport::knowing(&["a", "b"], &[]));
        let batcher = batcher(&transport, DEFAULT_CHUNK_SIZE);

        assert!(batcher.lookup("us", "a").await.is_ok());
        assert!(batcher.lookup("us", "b").await.is_ok());
        assert_eq!(transport.calls().len(), 2);
    }
}
