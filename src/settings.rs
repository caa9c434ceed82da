use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    history::{timezone::MONTEVIDEO_UTC_OFFSET_MINUTES, ColorCodes, FetchPolicy},
    washing::{classifier::DEFAULT_FINALIZE_AFTER_MINUTES, DEFAULT_SCAN_INTERVAL_SECS},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchSettings {
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub base_delay_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        let policy = FetchPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            attempt_timeout_ms: policy.attempt_timeout.as_millis() as u64,
            base_delay_ms: policy.base_delay.as_millis() as u64,
        }
    }
}

impl FetchSettings {
    pub fn policy(&self) -> FetchPolicy {
        FetchPolicy {
            max_attempts: self.max_attempts,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub display_utc_offset_minutes: i32,
    pub fetch: FetchSettings,
    pub finalize_after_minutes: i64,
    pub scan_interval_secs: u64,
    pub color_codes: ColorCodes,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            display_utc_offset_minutes: MONTEVIDEO_UTC_OFFSET_MINUTES,
            fetch: FetchSettings::default(),
            finalize_after_minutes: DEFAULT_FINALIZE_AFTER_MINUTES,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            color_codes: ColorCodes::default(),
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    /// Missing or unreadable settings fall back to the defaults.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!("Ignoring malformed settings in {}: {err}", path.display());
                AppSettings::default()
            })
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> Result<AppSettings> {
        self.data
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    pub fn update(&self, settings: AppSettings) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: AppSettings = serde_json::from_str(&contents)?;
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        *guard = data;
        Ok(())
    }
}
