pub mod db;
pub mod history;
pub mod notify;
pub mod settings;
pub mod store;
mod utils;
pub mod washing;

use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use db::Database;
use history::{DisplayTimezone, HistoryService, SensorFetcher, WindowPlanner};
use notify::{Notification, Notifier};
use settings::SettingsStore;
use tokio::sync::broadcast::error::RecvError;
use washing::{
    EligibilityRule, PendingScanner, WashBoard, WashFinalizer, DEBUG_SCAN_INTERVAL_SECS,
};

const DATA_DIR_ENV: &str = "HEMORENEW_DATA_DIR";
const DEBUG_ENV: &str = "HEMORENEW_DEBUG";
const DEFAULT_DATA_DIR: &str = "data";

pub struct AppState {
    pub db: Arc<Database>,
    pub settings: SettingsStore,
    pub notifier: Notifier,
    pub history: HistoryService<Database, Database>,
    pub board: Arc<WashBoard<Database, Database>>,
}

impl AppState {
    /// Opens the settings and the database under `data_dir` and wires the
    /// history and washing services on top of them.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let config = settings.get()?;

        let db = Arc::new(Database::new(data_dir.join("hemorenew.sqlite3"))?);
        let tz = DisplayTimezone::from_utc_offset_minutes(config.display_utc_offset_minutes)
            .context("invalid displayUtcOffsetMinutes setting")?;
        let notifier = Notifier::new();

        let fetcher = SensorFetcher::new(db.clone(), config.fetch.policy(), WindowPlanner::new(tz));
        let history = HistoryService::new(
            db.clone(),
            fetcher.clone(),
            config.color_codes.clone(),
            notifier.clone(),
        );
        let finalizer = WashFinalizer::new(
            db.clone(),
            fetcher,
            EligibilityRule::new(chrono::Duration::minutes(config.finalize_after_minutes), tz),
            config.color_codes,
            notifier.clone(),
        );
        let board = Arc::new(WashBoard::new(db.clone(), finalizer));

        Ok(Self {
            db,
            settings,
            notifier,
            history,
            board,
        })
    }

    pub fn scanner(&self, interval: Duration) -> PendingScanner<Database, Database> {
        PendingScanner::new(Arc::clone(&self.board), interval)
    }
}

fn debug_mode() -> bool {
    env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn spawn_notification_logger(notifier: &Notifier) {
    let mut rx = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(Notification::Error { message }) => log::error!("{message}"),
                Ok(Notification::Info { message }) => log::info!("{message}"),
                Ok(Notification::BatchSummary {
                    success_count,
                    error_count,
                    skipped_count,
                }) => log::info!(
                    "Pending washings updated: {success_count} ok, {error_count} failed, {skipped_count} skipped"
                ),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Notification logger fell behind, {missed} notification(s) dropped")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("HemoRenew starting up...");

    let data_dir = env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let state = AppState::open(&data_dir)?;
    spawn_notification_logger(&state.notifier);

    let interval = if debug_mode() {
        Duration::from_secs(DEBUG_SCAN_INTERVAL_SECS)
    } else {
        Duration::from_secs(state.settings.get()?.scan_interval_secs.max(1))
    };
    let mut scanner = state.scanner(interval);
    scanner.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    log::info!("HemoRenew shutting down...");
    scanner.stop().await
}
