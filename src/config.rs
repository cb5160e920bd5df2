use std::{path::PathBuf, time::Duration};

use anyhow::{ensure, Context, Result};

use crate::{
    feed::{FeedConfig, RetryPolicy},
    history::{HistoryAggregator, InvalidRecordPolicy, DEFAULT_WINDOW_DAYS},
};

/// Upper bound for `HISTORY_WINDOW_DAYS`, about a century.
const MAX_HISTORY_WINDOW_DAYS: u32 = 36_500;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the weather backend, e.g. `http://weather.local:8080/`.
    pub api_base_url: String,
    /// Latest-report polling interval in seconds.
    pub poll_interval_secs: u64,
    /// Delay between retries of a failed poll. Defaults to the poll interval.
    pub retry_delay_secs: u64,
    /// `None` retries until the next tick.
    pub max_retries: Option<u32>,
    pub history_window_days: u32,
    pub abort_on_invalid_record: bool,
    /// How often the latest-report summary is logged.
    pub summary_interval_secs: u64,
    /// How often history of tracked devices is reloaded.
    pub history_refresh_secs: u64,
    /// JSON file holding the persisted device preferences.
    pub preferences_path: PathBuf,
    /// Devices to start tracking at startup, in addition to the persisted ones.
    /// Format: `"model1,model2"`.
    pub tracked_devices: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let poll_interval_secs: u64 = optional("POLL_INTERVAL_SECS", "30")
            .parse()
            .context("POLL_INTERVAL_SECS must be a positive integer")?;

        let config = Self {
            api_base_url: required("DASHBOARD_API_BASE_URL")?,
            poll_interval_secs,
            retry_delay_secs: optional("RETRY_DELAY_SECS", &poll_interval_secs.to_string())
                .parse()
                .context("RETRY_DELAY_SECS must be a positive integer")?,
            max_retries: std::env::var("MAX_RETRIES")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().parse())
                .transpose()
                .context("MAX_RETRIES must be a non-negative integer")?,
            history_window_days: optional("HISTORY_WINDOW_DAYS", &DEFAULT_WINDOW_DAYS.to_string())
                .parse()
                .context("HISTORY_WINDOW_DAYS must be a non-negative integer")?,
            abort_on_invalid_record: parse_bool(&optional("ABORT_ON_INVALID_RECORD", "false"))
                .context("ABORT_ON_INVALID_RECORD must be true or false")?,
            summary_interval_secs: optional("SUMMARY_INTERVAL_SECS", "10")
                .parse()
                .context("SUMMARY_INTERVAL_SECS must be a positive integer")?,
            history_refresh_secs: optional("HISTORY_REFRESH_SECS", "300")
                .parse()
                .context("HISTORY_REFRESH_SECS must be a positive integer")?,
            preferences_path: optional("PREFERENCES_PATH", "preferences.json").into(),
            tracked_devices: parse_tracked_devices(&optional("TRACKED_DEVICES", "")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Zero-length periods would make the tokio intervals panic or spin.
    /// The history window is capped at `MAX_HISTORY_WINDOW_DAYS`.
    fn validate(&self) -> Result<()> {
        ensure!(self.poll_interval_secs > 0, "POLL_INTERVAL_SECS must be greater than zero");
        ensure!(self.retry_delay_secs > 0, "RETRY_DELAY_SECS must be greater than zero");
        ensure!(self.summary_interval_secs > 0, "SUMMARY_INTERVAL_SECS must be greater than zero");
        ensure!(self.history_refresh_secs > 0, "HISTORY_REFRESH_SECS must be greater than zero");
        ensure!(
            self.history_window_days <= MAX_HISTORY_WINDOW_DAYS,
            "HISTORY_WINDOW_DAYS must be at most {MAX_HISTORY_WINDOW_DAYS}"
        );
        Ok(())
    }

    pub fn feed(&self) -> FeedConfig {
        FeedConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            retry: RetryPolicy {
                retry_delay: Duration::from_secs(self.retry_delay_secs),
                max_retries: self.max_retries,
            },
        }
    }

    pub fn aggregator(&self) -> HistoryAggregator {
        let policy = if self.abort_on_invalid_record {
            InvalidRecordPolicy::Abort
        } else {
            InvalidRecordPolicy::Skip
        };
        HistoryAggregator::new(self.history_window_days, policy)
    }
}

/// Parse `"model1,model2"`, dropping empty entries and surrounding whitespace.
fn parse_tracked_devices(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(anyhow::anyhow!("not a boolean: {other:?}")),
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
