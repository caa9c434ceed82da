use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::{
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::store::{SensorStore, WashStore};

use super::board::WashBoard;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 60;
pub const DEBUG_SCAN_INTERVAL_SECS: u64 = 5;
const PASS_TIMEOUT_SECS: u64 = 120;

/// Periodically rescans the wash board so pending cycles get finalized
/// without anyone opening the list.
pub struct PendingScanner<S, W> {
    board: Arc<WashBoard<S, W>>,
    interval: Duration,
    pass_timeout: Duration,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl<S: SensorStore, W: WashStore> PendingScanner<S, W> {
    pub fn new(board: Arc<WashBoard<S, W>>, interval: Duration) -> Self {
        Self {
            board,
            interval,
            pass_timeout: Duration::from_secs(PASS_TIMEOUT_SECS),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn with_pass_timeout(mut self, pass_timeout: Duration) -> Self {
        self.pass_timeout = pass_timeout;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            bail!("pending scanner already running");
        }

        info!("Starting pending wash scanner every {}s", self.interval.as_secs_f64());

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(scan_loop(
            Arc::clone(&self.board),
            self.interval,
            self.pass_timeout,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("pending scanner task failed to join")
        } else {
            Ok(())
        }
    }
}

async fn scan_loop<S: SensorStore, W: WashStore>(
    board: Arc<WashBoard<S, W>>,
    interval: Duration,
    pass_timeout: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pass = tokio::time::timeout(pass_timeout, board.rescan(&cancel_token));
                tokio::select! {
                    result = pass => match result {
                        Ok(Ok(summary)) if summary.attempted() > 0 => log_info!(
                            "pending scan finalized {} washing(s), {} failed, {} skipped",
                            summary.success_count, summary.error_count, summary.skipped_count
                        ),
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => log_error!("pending scan failed: {err:?}"),
                        Err(_) => log_warn!("pending scan timeout (> {}s)", pass_timeout.as_secs_f64()),
                    },
                    _ = cancel_token.cancelled() => {
                        log_info!("pending scanner interrupted mid-pass, shutting down");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("pending scanner shutting down");
                break;
            }
        }
    }
}
