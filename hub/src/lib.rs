//! Resilient client for the scan verification service.
//!
//! All outbound traffic passes through a circuit breaker; scheduled jobs
//! keep the session alive, mirror the hub's code locations and poll
//! in-progress scans for completion. The rest of the system only ever
//! sees completion events and cheap cache reads.

pub mod breaker;
pub mod client;
pub mod jobs;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use scandium_model::ScanCompletion;
use tokio::sync::{mpsc, watch};

use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use client::{CodeLocation, FetchedScan, HubClient};

/// Errors across all jobs are kept for diagnostics, capped; the oldest
/// half is dropped on overflow.
const MAX_RECORDED_ERRORS: usize = 1000;

const COMPLETION_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is unavailable, retry in {retry_in:?}")]
    Unavailable { retry_in: Duration },
    #[error("no known scan named {0}")]
    UnknownScan(String),
    #[error(transparent)]
    Client(#[from] client::Error),
}

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub base_url: Url,
    pub user: String,
    pub password: String,
    pub login_interval: Duration,
    pub refresh_interval: Duration,
    pub completion_interval: Duration,
    pub breaker: BreakerConfig,
}

/// The part of a code location we keep cached, keyed by scan name.
#[derive(Clone, Debug)]
pub struct CachedCodeLocation {
    pub href: String,
    pub mapped_project_version: Option<String>,
}

#[derive(Default)]
struct Caches {
    code_locations: HashMap<String, CachedCodeLocation>,
    /// Scan names awaiting a terminal outcome from the hub.
    in_progress: HashSet<String>,
    errors: VecDeque<String>,
}

struct HubInner {
    client: HubClient,
    config: HubConfig,
    breaker: Mutex<CircuitBreaker>,
    caches: RwLock<Caches>,
    /// Availability as seen by the login job. Dependent jobs pause while
    /// down and resume immediately on the flip back up.
    up: watch::Sender<bool>,
    completions: mpsc::Sender<ScanCompletion>,
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Create the client plus the receiving end of its completion events.
    pub fn new(config: HubConfig) -> Result<(Self, mpsc::Receiver<ScanCompletion>), HubError> {
        let client = HubClient::new(
            config.base_url.clone(),
            config.user.clone(),
            config.password.clone(),
        )?;
        let (completions, rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        let (up, _) = watch::channel(false);
        let breaker = CircuitBreaker::new(config.breaker.clone());

        let hub = Self {
            inner: Arc::new(HubInner {
                client,
                config,
                breaker: Mutex::new(breaker),
                caches: RwLock::new(Caches::default()),
                up,
                completions,
            }),
        };
        Ok((hub, rx))
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Whether the last login attempt succeeded.
    pub fn is_up(&self) -> bool {
        *self.inner.up.borrow()
    }

    /// Watch hub availability; used to gate the model and the dependent
    /// jobs.
    pub fn availability(&self) -> watch::Receiver<bool> {
        self.inner.up.subscribe()
    }

    pub(crate) fn set_up(&self, up: bool) {
        self.inner.up.send_replace(up);
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.inner.breaker.lock().state()
    }

    /// Operator intervention: let the next call through immediately.
    pub fn reset_circuit_breaker(&self) {
        self.inner.breaker.lock().reset();
    }

    pub fn recent_errors(&self) -> Vec<String> {
        self.inner.caches.read().errors.iter().cloned().collect()
    }

    /// Start polling this scan name for completion.
    pub fn track_scan(&self, name: impl Into<String>) {
        let name = name.into();
        if self.inner.caches.write().in_progress.insert(name.clone()) {
            log::info!("now polling scan {name} for completion");
        }
    }

    pub fn untrack_scan(&self, name: &str) {
        self.inner.caches.write().in_progress.remove(name);
    }

    pub fn in_progress_scan_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.caches.read().in_progress.iter().cloned().collect();
        names.sort();
        names
    }

    /// Answer "does a record already exist for this scan" from the cached
    /// code location map, without a live round trip.
    pub fn has_code_location(&self, name: &str) -> bool {
        self.inner.caches.read().code_locations.contains_key(name)
    }

    pub fn code_location_count(&self) -> usize {
        self.inner.caches.read().code_locations.len()
    }

    pub async fn login(&self) -> Result<(), HubError> {
        self.begin_call()?;
        let result = self.inner.client.login().await;
        self.settle("login", result)
    }

    pub async fn current_version(&self) -> Result<String, HubError> {
        self.begin_call()?;
        let result = self.inner.client.current_version().await;
        self.settle("currentVersion", result)
    }

    pub async fn fetch_scan(&self, name: &str) -> Result<Option<FetchedScan>, HubError> {
        self.begin_call()?;
        let result = self.inner.client.fetch_scan(name).await;
        self.settle("fetchScan", result)
    }

    /// Re-list every code location and replace the cache.
    pub async fn refresh_code_locations(&self) -> Result<usize, HubError> {
        self.begin_call()?;
        let result = self.inner.client.list_all_code_locations().await;
        let locations = self.settle("fetchAllCodeLocations", result)?;

        let map: HashMap<String, CachedCodeLocation> = locations
            .into_iter()
            .map(|location| (location.name.clone(), cached(location)))
            .collect();
        let count = map.len();
        self.inner.caches.write().code_locations = map;
        log::debug!("refreshed {count} code locations");
        Ok(count)
    }

    /// Delete a code location and its mapped project version as one
    /// logical operation. The cache entry is only dropped once both
    /// deletes succeed.
    pub async fn delete_scan(&self, name: &str) -> Result<(), HubError> {
        let location = self
            .inner
            .caches
            .read()
            .code_locations
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::UnknownScan(name.into()))?;

        self.begin_call()?;
        if let Some(version) = &location.mapped_project_version {
            let result = self.inner.client.delete_project_version(version).await;
            self.settle("deleteProjectVersion", result)?;
        }

        self.begin_call()?;
        let result = self.inner.client.delete_code_location(&location.href).await;
        self.settle("deleteCodeLocation", result)?;

        self.inner.caches.write().code_locations.remove(name);
        Ok(())
    }

    pub(crate) async fn emit(&self, completion: ScanCompletion) {
        if self.inner.completions.send(completion).await.is_err() {
            log::warn!("completion receiver is gone, dropping event");
        }
    }

    fn begin_call(&self) -> Result<(), HubError> {
        self.inner
            .breaker
            .lock()
            .allow_call(Instant::now())
            .map_err(|retry_in| HubError::Unavailable { retry_in })
    }

    fn settle<T>(&self, op: &str, result: Result<T, client::Error>) -> Result<T, HubError> {
        match result {
            Ok(value) => {
                self.inner.breaker.lock().record_success();
                Ok(value)
            }
            Err(e) => {
                self.inner.breaker.lock().record_failure(Instant::now());
                self.record_error(op, &e);
                Err(e.into())
            }
        }
    }

    fn record_error(&self, op: &str, err: &client::Error) {
        let mut caches = self.inner.caches.write();
        caches.errors.push_back(format!("{op}: {err}"));
        if caches.errors.len() > MAX_RECORDED_ERRORS {
            caches.errors.drain(..MAX_RECORDED_ERRORS / 2);
        }
    }
}

fn cached(location: CodeLocation) -> CachedCodeLocation {
    CachedCodeLocation {
        href: location.meta.href.clone(),
        mapped_project_version: location.mapped_project_version,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hub() -> Hub {
        let (hub, _rx) = Hub::new(HubConfig {
            base_url: Url::parse("https://hub.example.com").unwrap(),
            user: "sysadmin".into(),
            password: "hunter2".into(),
            login_interval: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(120),
            completion_interval: Duration::from_secs(20),
            breaker: BreakerConfig::default(),
        })
        .unwrap();
        hub
    }

    #[test]
    fn tracked_scans_are_deduplicated_and_sorted() {
        let hub = hub();
        hub.track_scan("l2");
        hub.track_scan("l1");
        hub.track_scan("l2");
        assert_eq!(vec!["l1".to_string(), "l2".to_string()], hub.in_progress_scan_names());

        hub.untrack_scan("l1");
        assert_eq!(vec!["l2".to_string()], hub.in_progress_scan_names());
    }

    #[test]
    fn error_ring_is_bounded() {
        let hub = hub();
        for i in 0..(MAX_RECORDED_ERRORS + 1) {
            hub.record_error(
                "test",
                &client::Error::Protocol(format!("synthetic error {i}")),
            );
        }
        let errors = hub.recent_errors();
        assert_eq!(MAX_RECORDED_ERRORS / 2 + 1, errors.len());
        // the oldest half was dropped
        assert!(errors[0].contains(&format!("synthetic error {}", MAX_RECORDED_ERRORS / 2)));
    }

    #[tokio::test]
    async fn delete_of_unknown_scan_is_rejected() {
        let hub = hub();
        let err = hub.delete_scan("never-seen").await.unwrap_err();
        assert!(matches!(err, HubError::UnknownScan(_)));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_network() {
        let hub = hub();
        hub.inner
            .breaker
            .lock()
            .record_failure(Instant::now());

        // no request is attempted; the breaker refuses immediately
        let err = hub.current_version().await.unwrap_err();
        assert!(matches!(err, HubError::Unavailable { .. }));
        assert_eq!(BreakerState::Open, hub.breaker_state());

        hub.reset_circuit_breaker();
        assert_eq!(BreakerState::Closed, hub.breaker_state());
    }
}
