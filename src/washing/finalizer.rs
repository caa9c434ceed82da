//! Writes the derived outcome of wash cycles whose sensor windows have closed.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    db::WashCycle,
    history::{finalization_outcome, ColorCodes, FetchError, FetchHandle, SensorFetcher},
    notify::{Notification, Notifier},
    store::{SensorStore, WashStore},
};

use super::classifier::EligibilityRule;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub success_count: u32,
    pub error_count: u32,
    /// Finalized by someone else between selection and write.
    pub skipped_count: u32,
}

impl BatchSummary {
    pub fn attempted(&self) -> u32 {
        self.success_count + self.error_count + self.skipped_count
    }
}

impl From<BatchSummary> for Notification {
    fn from(summary: BatchSummary) -> Self {
        Notification::BatchSummary {
            success_count: summary.success_count,
            error_count: summary.error_count,
            skipped_count: summary.skipped_count,
        }
    }
}

enum CycleResult {
    Written,
    Skipped,
    Cancelled,
}

pub struct WashFinalizer<S, W> {
    washes: Arc<W>,
    fetcher: SensorFetcher<S>,
    rule: EligibilityRule,
    codes: ColorCodes,
    notifier: Notifier,
}

impl<S: SensorStore, W: WashStore> WashFinalizer<S, W> {
    pub fn new(
        washes: Arc<W>,
        fetcher: SensorFetcher<S>,
        rule: EligibilityRule,
        codes: ColorCodes,
        notifier: Notifier,
    ) -> Self {
        Self {
            washes,
            fetcher,
            rule,
            codes,
            notifier,
        }
    }

    /// Finalizes every eligible cycle of `cycles`, one after the other.
    ///
    /// A failing cycle is counted and the batch moves on. Cancelling `cancel`
    /// stops the batch before the next write. One summary notification
    /// follows any batch that attempted at least one cycle.
    pub async fn finalize_eligible(
        &self,
        cycles: &[WashCycle],
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let eligible: Vec<&WashCycle> = cycles
            .iter()
            .filter(|cycle| self.rule.is_eligible(cycle, now))
            .collect();

        let mut summary = BatchSummary::default();
        if eligible.is_empty() {
            return summary;
        }

        log_info!("Finalizing {} pending wash cycle(s)", eligible.len());

        for cycle in eligible {
            if cancel.is_cancelled() {
                log_info!("Finalization batch cancelled before washing {}", cycle.id);
                break;
            }
            match self.finalize_cycle(cycle, cancel).await {
                Ok(CycleResult::Written) => summary.success_count += 1,
                Ok(CycleResult::Skipped) => summary.skipped_count += 1,
                Ok(CycleResult::Cancelled) => {
                    log_info!("Finalization batch cancelled while loading washing {}", cycle.id);
                    break;
                }
                Err(err) => {
                    log_error!("Failed to finalize washing {}: {err:#}", cycle.id);
                    summary.error_count += 1;
                }
            }
        }

        if summary.attempted() == 0 {
            return summary;
        }

        log_info!(
            "Finalization batch done: {} updated, {} failed, {} skipped",
            summary.success_count,
            summary.error_count,
            summary.skipped_count
        );
        self.notifier.notify(summary.into());

        summary
    }

    /// Manual "update all pending": loads every washing first.
    pub async fn finalize_all_pending(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let cycles = self
            .washes
            .list_washings(None)
            .await
            .context("failed to load washings for finalization")?;
        Ok(self.finalize_eligible(&cycles, now, cancel).await)
    }

    async fn finalize_cycle(
        &self,
        cycle: &WashCycle,
        cancel: &CancellationToken,
    ) -> Result<CycleResult> {
        let handle = FetchHandle::child_of(cancel);
        let bundle = match self.fetcher.fetch_bundle(cycle.start_date, &handle).await {
            Ok(bundle) => bundle,
            Err(FetchError::Cancelled) => return Ok(CycleResult::Cancelled),
            Err(err) => return Err(err).context("sensor fetch failed"),
        };
        let outcome = finalization_outcome(&bundle, &self.codes);

        let current = self
            .washes
            .get_washing(&cycle.id)
            .await
            .context("failed to re-read washing")?
            .ok_or_else(|| anyhow!("Washing not found"))?;
        if !current.is_pending() {
            log_info!("Washing {} was finalized concurrently, leaving it as is", cycle.id);
            return Ok(CycleResult::Skipped);
        }

        self.washes
            .update_outcome(&cycle.id, outcome)
            .await
            .context("failed to write outcome")?;

        log_info!(
            "Washing {} finalized: residual volume {}, integrity {:?}",
            cycle.id,
            outcome.residual_volume,
            outcome.integrity_test
        );
        Ok(CycleResult::Written)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::HashSet, sync::Mutex};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    use crate::{
        db::{Database, IntegrityVerdict, NewWashCycle, SensorKind, SensorValue, WashOutcome, WashStatus},
        history::{
            fetch::tests::{fast_policy, Script, ScriptedSensors},
            DisplayTimezone, WindowPlanner,
        },
        washing::classifier::tests::cycle,
    };

    use super::*;

    /// In-memory wash store that can fail writes or race a concurrent
    /// finalization for chosen ids.
    #[derive(Default)]
    pub(crate) struct FakeWashes {
        cycles: Mutex<Vec<WashCycle>>,
        failing_writes: HashSet<String>,
        finalized_elsewhere: HashSet<String>,
        writes: Mutex<Vec<String>>,
    }

    impl FakeWashes {
        pub fn new(cycles: Vec<WashCycle>) -> Self {
            Self {
                cycles: Mutex::new(cycles),
                ..Self::default()
            }
        }

        pub fn failing_write(mut self, id: &str) -> Self {
            self.failing_writes.insert(id.into());
            self
        }

        pub fn finalized_elsewhere(mut self, id: &str) -> Self {
            self.finalized_elsewhere.insert(id.into());
            self
        }

        pub fn writes(&self) -> Vec<String> {
            self.writes.lock().expect("writes lock").clone()
        }
    }

    #[async_trait]
    impl WashStore for FakeWashes {
        async fn list_washings(&self, patient_ref: Option<&str>) -> Result<Vec<WashCycle>> {
            let cycles = self.cycles.lock().expect("cycles lock");
            Ok(cycles
                .iter()
                .filter(|c| patient_ref.map_or(true, |p| c.patient_ref == p))
                .cloned()
                .collect())
        }

        async fn get_washing(&self, washing_id: &str) -> Result<Option<WashCycle>> {
            let cycles = self.cycles.lock().expect("cycles lock");
            Ok(cycles.iter().find(|c| c.id == washing_id).cloned().map(|mut c| {
                if self.finalized_elsewhere.contains(washing_id) {
                    c.integrity_test = IntegrityVerdict::Fail;
                }
                c
            }))
        }

        async fn update_outcome(&self, washing_id: &str, outcome: WashOutcome) -> Result<()> {
            if self.failing_writes.contains(washing_id) {
                return Err(anyhow!("write rejected for {washing_id}"));
            }
            let mut cycles = self.cycles.lock().expect("cycles lock");
            let cycle = cycles
                .iter_mut()
                .find(|c| c.id == washing_id)
                .ok_or_else(|| anyhow!("Washing not found"))?;
            cycle.residual_volume = outcome.residual_volume;
            cycle.integrity_test = outcome.integrity_test;
            self.writes.lock().expect("writes lock").push(washing_id.into());
            Ok(())
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
    }

    fn utc() -> DisplayTimezone {
        DisplayTimezone::from_utc_offset_minutes(0).unwrap()
    }

    pub(crate) fn sensors() -> ScriptedSensors {
        ScriptedSensors::new()
            .readings(SensorKind::Ultrasound, vec![(5, SensorValue::Numeric(3.0))])
            .readings(SensorKind::Color, vec![(5, SensorValue::Code("clear".into()))])
    }

    fn finalizer<W: WashStore>(washes: Arc<W>, notifier: Notifier) -> WashFinalizer<ScriptedSensors, W> {
        finalizer_over(washes, sensors(), notifier)
    }

    fn finalizer_over<W: WashStore>(
        washes: Arc<W>,
        sensors: ScriptedSensors,
        notifier: Notifier,
    ) -> WashFinalizer<ScriptedSensors, W> {
        let fetcher = SensorFetcher::new(Arc::new(sensors), fast_policy(), WindowPlanner::new(utc()));
        WashFinalizer::new(
            washes,
            fetcher,
            EligibilityRule::new(Duration::minutes(20), utc()),
            ColorCodes::default(),
            notifier,
        )
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_batch() {
        let cycles = vec![cycle("a", start()), cycle("b", start()), cycle("c", start())];
        let washes = Arc::new(FakeWashes::new(cycles.clone()).failing_write("b"));
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        let summary = finalizer(washes.clone(), notifier)
            .finalize_eligible(&cycles, start() + Duration::hours(1), &CancellationToken::new())
            .await;

        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.error_count, 1);
        assert_eq!(washes.writes(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(rx.try_recv().expect("summary"), Notification::from(summary));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn aborted_fetch_counts_as_error_and_batch_continues() {
        let cycles = vec![cycle("a", start()), cycle("b", start()), cycle("c", start())];
        let washes = Arc::new(FakeWashes::new(cycles.clone()));
        let sensors = sensors().script(
            SensorKind::Color,
            Script {
                panics: 1,
                ..Script::default()
            },
        );

        let summary = finalizer_over(washes.clone(), sensors, Notifier::new())
            .finalize_eligible(&cycles, start() + Duration::hours(1), &CancellationToken::new())
            .await;

        assert_eq!(
            summary,
            BatchSummary {
                success_count: 2,
                error_count: 1,
                skipped_count: 0,
            }
        );
        assert_eq!(washes.writes(), vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_batch_writes_nothing() {
        let cycles = vec![cycle("a", start()), cycle("b", start())];
        let washes = Arc::new(FakeWashes::new(cycles.clone()));
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = finalizer(washes.clone(), notifier)
            .finalize_eligible(&cycles, start() + Duration::hours(1), &cancel)
            .await;

        assert_eq!(summary, BatchSummary::default());
        assert!(washes.writes().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_during_fetch_stops_the_batch() {
        let cycles = vec![cycle("a", start()), cycle("b", start())];
        let washes = Arc::new(FakeWashes::new(cycles.clone()));
        let sensors = sensors().script(
            SensorKind::Flow,
            Script {
                delay: Some(std::time::Duration::from_secs(5)),
                ..Script::default()
            },
        );
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let summary = finalizer_over(washes.clone(), sensors, Notifier::new())
            .finalize_eligible(&cycles, start() + Duration::hours(1), &cancel)
            .await;

        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(summary.attempted(), 0);
        assert!(washes.writes().is_empty());
    }

    #[tokio::test]
    async fn only_eligible_cycles_are_touched() {
        let mut done = cycle("done", start());
        done.residual_volume = 100.0;
        done.integrity_test = IntegrityVerdict::Pass;
        let fresh = cycle("fresh", start() + Duration::minutes(50));
        let old = cycle("old", start());
        let cycles = vec![done, fresh, old];
        let washes = Arc::new(FakeWashes::new(cycles.clone()));

        let summary = finalizer(washes.clone(), Notifier::new())
            .finalize_eligible(&cycles, start() + Duration::minutes(60), &CancellationToken::new())
            .await;

        assert_eq!(summary.attempted(), 1);
        assert_eq!(washes.writes(), vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn concurrently_finalized_cycle_is_skipped() {
        let cycles = vec![cycle("a", start()), cycle("b", start())];
        let washes = Arc::new(FakeWashes::new(cycles.clone()).finalized_elsewhere("a"));

        let summary = finalizer(washes.clone(), Notifier::new())
            .finalize_eligible(&cycles, start() + Duration::hours(1), &CancellationToken::new())
            .await;

        assert_eq!(
            summary,
            BatchSummary {
                success_count: 1,
                error_count: 0,
                skipped_count: 1,
            }
        );
        assert_eq!(washes.writes(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn empty_batch_is_silent() {
        let washes = Arc::new(FakeWashes::new(Vec::new()));
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        let summary = finalizer(washes, notifier)
            .finalize_eligible(
                &[cycle("young", start())],
                start() + Duration::minutes(5),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(summary, BatchSummary::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn finalize_all_pending_writes_to_the_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(dir.path().join("test.sqlite3")).expect("open db"));
        let pending = db
            .insert_washing(&NewWashCycle {
                patient_ref: "p1".into(),
                filter_ref: "f1".into(),
                attended_by_ref: None,
                start_date: start(),
                status: WashStatus::Active,
            })
            .await
            .expect("insert");

        let summary = finalizer(db.clone(), Notifier::new())
            .finalize_all_pending(start() + Duration::hours(2), &CancellationToken::new())
            .await
            .expect("batch runs");
        assert_eq!(summary.success_count, 1);

        let stored = db.get_washing(&pending.id).await.expect("get").expect("exists");
        assert_eq!(stored.residual_volume, 204.83);
        assert_eq!(stored.integrity_test, IntegrityVerdict::Pass);

        let again = finalizer(db, Notifier::new())
            .finalize_all_pending(start() + Duration::hours(3), &CancellationToken::new())
            .await
            .expect("batch runs");
        assert_eq!(again.attempted(), 0);
    }
}
