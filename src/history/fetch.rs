//! Resilient fetch of the four sensor series of a wash cycle.
//!
//! Every series is fetched on its own task with a bounded retry loop. A
//! series that keeps failing degrades to an empty list; it never fails the
//! bundle. Callers watch per-series loading flags and may cancel at any time.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::watch,
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Measurement, SensorKind},
    store::SensorStore,
};

use super::window::{SensorWindow, WindowPlanner};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Delay after attempt `n` is `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl FetchPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.checked_mul(attempt).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{kind} request timed out after {timeout_ms}ms")]
    Timeout { kind: SensorKind, timeout_ms: u64 },

    #[error("{kind} request failed: {message}")]
    Store { kind: SensorKind, message: String },

    #[error("sensor fetch cancelled")]
    Cancelled,

    #[error("{kind} fetch task aborted: {message}")]
    Orchestration { kind: SensorKind, message: String },
}

/// Runs `op` until it succeeds, the attempts run out or `cancel` fires.
///
/// Each attempt is bounded by `policy.attempt_timeout`. Cancellation is
/// honoured before every attempt, while an attempt is in flight and during
/// the backoff sleep.
pub async fn retry_with_timeout<T, F, Fut>(
    policy: &FetchPolicy,
    kind: SensorKind,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(policy.attempt_timeout, op()) => outcome,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => FetchError::Store {
                kind,
                message: format!("{err:#}"),
            },
            Err(_) => FetchError::Timeout {
                kind,
                timeout_ms: policy.attempt_timeout.as_millis() as u64,
            },
        };

        log_warn!("Attempt {attempt}/{max_attempts} for {kind} failed: {error}");

        if attempt >= max_attempts {
            return Err(error);
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.backoff(attempt)) => {}
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        }

        attempt += 1;
    }
}

/// `true` while a series is still loading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFlags {
    pub colors: bool,
    pub flows: bool,
    pub temperatures: bool,
    pub ultrasounds: bool,
}

impl LoadingFlags {
    pub fn all(loading: bool) -> Self {
        Self {
            colors: loading,
            flows: loading,
            temperatures: loading,
            ultrasounds: loading,
        }
    }

    pub fn get(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Color => self.colors,
            SensorKind::Flow => self.flows,
            SensorKind::Temperature => self.temperatures,
            SensorKind::Ultrasound => self.ultrasounds,
        }
    }

    pub fn set(&mut self, kind: SensorKind, loading: bool) {
        match kind {
            SensorKind::Color => self.colors = loading,
            SensorKind::Flow => self.flows = loading,
            SensorKind::Temperature => self.temperatures = loading,
            SensorKind::Ultrasound => self.ultrasounds = loading,
        }
    }

    pub fn any(&self) -> bool {
        SensorKind::ALL.iter().any(|kind| self.get(*kind))
    }
}

/// Cancel handle and progress feed for one bundle fetch. Clones share state.
#[derive(Clone)]
pub struct FetchHandle {
    cancel: CancellationToken,
    progress: Arc<watch::Sender<LoadingFlags>>,
}

impl FetchHandle {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Cancelled together with `parent`.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(cancel: CancellationToken) -> Self {
        let (progress, _) = watch::channel(LoadingFlags::default());
        Self {
            cancel,
            progress: Arc::new(progress),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> LoadingFlags {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoadingFlags> {
        self.progress.subscribe()
    }

    fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn set_loading(&self, kind: SensorKind, loading: bool) {
        self.progress.send_modify(|flags| flags.set(kind, loading));
    }

    fn set_all(&self, loading: bool) {
        self.progress.send_replace(LoadingFlags::all(loading));
    }
}

impl Default for FetchHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The four series of one wash cycle, keyed the way the history view shows them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorBundle {
    pub temperature: Vec<Measurement>,
    pub water_level: Vec<Measurement>,
    pub blood_leak: Vec<Measurement>,
    pub flow_rate: Vec<Measurement>,
}

impl SensorBundle {
    pub fn series(&self, kind: SensorKind) -> &[Measurement] {
        match kind {
            SensorKind::Color => &self.blood_leak,
            SensorKind::Flow => &self.flow_rate,
            SensorKind::Temperature => &self.temperature,
            SensorKind::Ultrasound => &self.water_level,
        }
    }

    pub fn is_empty(&self) -> bool {
        SensorKind::ALL.iter().all(|kind| self.series(*kind).is_empty())
    }
}

pub struct SensorFetcher<S> {
    store: Arc<S>,
    policy: FetchPolicy,
    planner: WindowPlanner,
}

impl<S> Clone for SensorFetcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            planner: self.planner,
        }
    }
}

impl<S: SensorStore> SensorFetcher<S> {
    pub fn new(store: Arc<S>, policy: FetchPolicy, planner: WindowPlanner) -> Self {
        Self {
            store,
            policy,
            planner,
        }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    pub fn planner(&self) -> &WindowPlanner {
        &self.planner
    }

    /// Fetches all four windows of the cycle starting at `start`.
    ///
    /// Only cancellation and an aborted fetch task surface as errors; a
    /// series that fails every attempt comes back empty.
    pub async fn fetch_bundle(
        &self,
        start: DateTime<Utc>,
        handle: &FetchHandle,
    ) -> Result<SensorBundle, FetchError> {
        if handle.is_cancelled() {
            log_info!("Sensor fetch for cycle at {start} cancelled before start");
            return Err(FetchError::Cancelled);
        }

        handle.set_all(true);

        let [color, flow, temperature, ultrasound] = self
            .planner
            .windows(start)
            .map(|window| self.spawn_source(window, handle.clone()));

        let (color, flow, temperature, ultrasound) =
            tokio::join!(color, flow, temperature, ultrasound);

        handle.set_all(false);

        let bundle = SensorBundle {
            blood_leak: joined(SensorKind::Color, color)?,
            flow_rate: joined(SensorKind::Flow, flow)?,
            temperature: joined(SensorKind::Temperature, temperature)?,
            water_level: joined(SensorKind::Ultrasound, ultrasound)?,
        };

        if handle.is_cancelled() {
            log_info!("Sensor fetch for cycle at {start} cancelled, discarding results");
            return Err(FetchError::Cancelled);
        }

        log_debug!(
            "Fetched sensor bundle for cycle at {start}: colors={} flows={} temperatures={} ultrasounds={}",
            bundle.blood_leak.len(),
            bundle.flow_rate.len(),
            bundle.temperature.len(),
            bundle.water_level.len()
        );

        Ok(bundle)
    }

    fn spawn_source(
        &self,
        window: SensorWindow,
        handle: FetchHandle,
    ) -> JoinHandle<Vec<Measurement>> {
        log_debug!("Fetching {}", self.planner.describe(&window));
        tokio::spawn(fetch_source(
            Arc::clone(&self.store),
            self.policy,
            window,
            handle,
        ))
    }
}

async fn fetch_source<S: SensorStore>(
    store: Arc<S>,
    policy: FetchPolicy,
    window: SensorWindow,
    handle: FetchHandle,
) -> Vec<Measurement> {
    let kind = window.kind;
    let range = window.range();

    let result = retry_with_timeout(&policy, kind, handle.token(), || {
        store.fetch_series(kind, range)
    })
    .await;

    handle.set_loading(kind, false);

    match result {
        Ok(series) => series,
        Err(FetchError::Cancelled) => Vec::new(),
        Err(err) => {
            log_warn!("Giving up on {kind} after {} attempts, using an empty series: {err}", policy.max_attempts.max(1));
            Vec::new()
        }
    }
}

fn joined(
    kind: SensorKind,
    result: Result<Vec<Measurement>, JoinError>,
) -> Result<Vec<Measurement>, FetchError> {
    result.map_err(|err| FetchError::Orchestration {
        kind,
        message: err.to_string(),
    })
}
