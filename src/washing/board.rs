use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    db::WashCycle,
    store::{SensorStore, WashStore},
};

use super::finalizer::{BatchSummary, WashFinalizer};

#[derive(Default)]
struct BoardState {
    patient_ref: Option<String>,
    cycles: Vec<WashCycle>,
}

/// The wash list an operator is looking at. Every reload finalizes the
/// eligible cycles it contains.
pub struct WashBoard<S, W> {
    washes: Arc<W>,
    finalizer: WashFinalizer<S, W>,
    state: RwLock<BoardState>,
}

impl<S: SensorStore, W: WashStore> WashBoard<S, W> {
    pub fn new(washes: Arc<W>, finalizer: WashFinalizer<S, W>) -> Self {
        Self {
            washes,
            finalizer,
            state: RwLock::new(BoardState::default()),
        }
    }

    /// Loads the washings of `patient_ref` (all when `None`) and finalizes
    /// the eligible ones.
    pub async fn refresh(&self, patient_ref: Option<&str>) -> Result<BatchSummary> {
        self.refresh_until(patient_ref, &CancellationToken::new()).await
    }

    /// Refreshes with the filter of the last refresh. Finalization stops
    /// once `cancel` fires.
    pub async fn rescan(&self, cancel: &CancellationToken) -> Result<BatchSummary> {
        let patient_ref = self.state.read().await.patient_ref.clone();
        self.refresh_until(patient_ref.as_deref(), cancel).await
    }

    async fn refresh_until(
        &self,
        patient_ref: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let cycles = self.load(patient_ref).await?;
        {
            let mut state = self.state.write().await;
            state.patient_ref = patient_ref.map(str::to_string);
            state.cycles = cycles.clone();
        }

        let summary = self
            .finalizer
            .finalize_eligible(&cycles, Utc::now(), cancel)
            .await;
        if summary.success_count > 0 {
            self.reload().await?;
        }
        Ok(summary)
    }

    pub async fn snapshot(&self) -> Vec<WashCycle> {
        self.state.read().await.cycles.clone()
    }

    /// Manual trigger: finalizes every eligible washing, not only the listed ones.
    pub async fn update_all_pending(&self) -> Result<BatchSummary> {
        let summary = self
            .finalizer
            .finalize_all_pending(Utc::now(), &CancellationToken::new())
            .await?;
        self.reload().await?;
        Ok(summary)
    }

    async fn reload(&self) -> Result<()> {
        let patient_ref = self.state.read().await.patient_ref.clone();
        let cycles = self.load(patient_ref.as_deref()).await?;
        self.state.write().await.cycles = cycles;
        Ok(())
    }

    async fn load(&self, patient_ref: Option<&str>) -> Result<Vec<WashCycle>> {
        self.washes
            .list_washings(patient_ref)
            .await
            .context("failed to load washings")
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use crate::{
        db::IntegrityVerdict,
        history::{
            fetch::tests::{fast_policy, ScriptedSensors},
            ColorCodes, DisplayTimezone, SensorFetcher, WindowPlanner,
        },
        notify::Notifier,
        washing::{
            classifier::{tests::cycle, EligibilityRule},
            finalizer::tests::{sensors, FakeWashes},
        },
    };

    use super::*;

    fn board(washes: Arc<FakeWashes>) -> WashBoard<ScriptedSensors, FakeWashes> {
        let tz = DisplayTimezone::default();
        let fetcher = SensorFetcher::new(Arc::new(sensors()), fast_policy(), WindowPlanner::new(tz));
        let finalizer = WashFinalizer::new(
            washes.clone(),
            fetcher,
            EligibilityRule::new(Duration::minutes(20), tz),
            ColorCodes::default(),
            Notifier::new(),
        );
        WashBoard::new(washes, finalizer)
    }

    fn old_cycle(id: &str, patient: &str) -> WashCycle {
        let mut washing = cycle(id, Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap());
        washing.patient_ref = patient.into();
        washing
    }

    fn young_cycle(id: &str) -> WashCycle {
        cycle(id, Utc::now() + Duration::days(1))
    }

    #[tokio::test]
    async fn refresh_finalizes_and_shows_updated_list() {
        let washes = Arc::new(FakeWashes::new(vec![old_cycle("old", "p1"), young_cycle("young")]));
        let board = board(washes.clone());

        let summary = board.refresh(None).await.expect("refresh");

        assert_eq!(summary.success_count, 1);
        let listed = board.snapshot().await;
        assert_eq!(listed.len(), 2);
        let old = listed.iter().find(|c| c.id == "old").expect("old listed");
        assert_eq!(old.integrity_test, IntegrityVerdict::Pass);
        assert!(listed.iter().find(|c| c.id == "young").expect("young listed").is_pending());
    }

    #[tokio::test]
    async fn refresh_only_finalizes_the_listed_patient() {
        let washes = Arc::new(FakeWashes::new(vec![old_cycle("a", "p1"), old_cycle("b", "p2")]));
        let board = board(washes.clone());

        board.refresh(Some("p1")).await.expect("refresh");
        assert_eq!(washes.writes(), vec!["a".to_string()]);
        assert_eq!(board.snapshot().await.len(), 1);

        let summary = board.rescan(&CancellationToken::new()).await.expect("rescan");
        assert_eq!(summary.attempted(), 0);
    }

    #[tokio::test]
    async fn update_all_pending_ignores_the_filter() {
        let washes = Arc::new(FakeWashes::new(vec![old_cycle("a", "p1"), old_cycle("b", "p2")]));
        let board = board(washes.clone());
        board.refresh(Some("p2")).await.expect("refresh");
        assert_eq!(washes.writes(), vec!["b".to_string()]);

        let summary = board.update_all_pending().await.expect("update all");

        assert_eq!(summary.success_count, 1);
        assert_eq!(washes.writes(), vec!["b".to_string(), "a".to_string()]);
        let listed = board.snapshot().await;
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_pending());
    }
}
