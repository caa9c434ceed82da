//! Wash history as the operator sees it: the list of cycles, the detail of
//! one cycle with its sensor windows and per-filter usage.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    db::{IntegrityVerdict, SortOrder, WashCycle},
    notify::{Notification, Notifier},
    store::{SensorStore, WashStore},
};

use super::{
    derived::{display_outcome, ColorCodes},
    fetch::{FetchError, FetchHandle, SensorBundle, SensorFetcher},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WashDetail {
    pub cycle: WashCycle,
    pub bundle: SensorBundle,
    pub residual_volume: f64,
    pub integrity: IntegrityVerdict,
    /// `false` while any sensor window is still open.
    pub window_complete: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterUsage {
    pub filter_ref: String,
    pub first_use: DateTime<Utc>,
    pub count: u32,
}

pub struct HistoryService<S, W> {
    washes: Arc<W>,
    fetcher: SensorFetcher<S>,
    codes: ColorCodes,
    notifier: Notifier,
}

impl<S: SensorStore, W: WashStore> HistoryService<S, W> {
    pub fn new(
        washes: Arc<W>,
        fetcher: SensorFetcher<S>,
        codes: ColorCodes,
        notifier: Notifier,
    ) -> Self {
        Self {
            washes,
            fetcher,
            codes,
            notifier,
        }
    }

    pub async fn list_washings(
        &self,
        patient_ref: Option<&str>,
        order: SortOrder,
    ) -> Result<Vec<WashCycle>> {
        let mut washings = self
            .washes
            .list_washings(patient_ref)
            .await
            .context("failed to load wash history")?;

        match order {
            SortOrder::Asc => washings.sort_by_key(|w| w.start_date),
            SortOrder::Desc => washings.sort_by(|a, b| b.start_date.cmp(&a.start_date)),
        }

        Ok(washings)
    }

    /// Loads the sensor windows of `cycle` and derives the displayed outcome.
    ///
    /// Returns `Ok(None)` when `handle` was cancelled. Orchestration failures
    /// are reported to the operator once and returned.
    pub async fn open_wash_detail(
        &self,
        cycle: &WashCycle,
        handle: &FetchHandle,
    ) -> Result<Option<WashDetail>> {
        let bundle = match self.fetcher.fetch_bundle(cycle.start_date, handle).await {
            Ok(bundle) => bundle,
            Err(FetchError::Cancelled) => {
                log_info!("Wash detail for {} closed before its data loaded", cycle.id);
                return Ok(None);
            }
            Err(err) => {
                log_error!("Failed to load sensor data for washing {}: {err}", cycle.id);
                self.notifier.notify(Notification::error(format!(
                    "Could not load the sensor data of this wash: {err}"
                )));
                return Err(err).with_context(|| format!("washing {}", cycle.id));
            }
        };

        let outcome = display_outcome(&bundle, &self.codes);
        let window_complete = self
            .fetcher
            .planner()
            .is_complete(cycle.start_date, Utc::now());

        Ok(Some(WashDetail {
            cycle: cycle.clone(),
            bundle,
            residual_volume: outcome.residual_volume,
            integrity: outcome.integrity_test,
            window_complete,
        }))
    }

    /// Washes per filter for one patient, in order of first use.
    pub async fn filter_usage(&self, patient_ref: &str) -> Result<Vec<FilterUsage>> {
        let washings = self.list_washings(Some(patient_ref), SortOrder::Asc).await?;

        let mut usage: Vec<FilterUsage> = Vec::new();
        for washing in washings {
            match usage.iter_mut().find(|u| u.filter_ref == washing.filter_ref) {
                Some(entry) => entry.count += 1,
                None => usage.push(FilterUsage {
                    filter_ref: washing.filter_ref,
                    first_use: washing.start_date,
                    count: 1,
                }),
            }
        }

        Ok(usage)
    }
}
