use std::{collections::BTreeSet, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::{
    history::{DeviceHistory, HistoryAggregator},
    models::{DeviceModel, WeatherReport},
    preferences::{DevicePreferences, KeyValueStore},
    snapshot::ReportSnapshot,
    source::ReportSource,
};

/// A catalog device together with whether the user monitors it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub model: DeviceModel,
    pub tracked: bool,
}

/// Data-loading side of the dashboard: persisted device selection, the
/// live snapshot it drives, history on demand and the device catalog.
pub struct Dashboard<S> {
    source: Arc<dyn ReportSource>,
    preferences: DevicePreferences<S>,
    snapshot: ReportSnapshot,
    aggregator: HistoryAggregator,
}

impl<S: KeyValueStore> Dashboard<S> {
    /// Seeds a fresh snapshot with the persisted tracked devices.
    pub fn new(
        source: Arc<dyn ReportSource>,
        preferences: DevicePreferences<S>,
        aggregator: HistoryAggregator,
    ) -> Self {
        let tracked = preferences.tracked_devices().unwrap_or_default();
        Self {
            source,
            preferences,
            snapshot: ReportSnapshot::with_tracked(tracked),
            aggregator,
        }
    }

    /// Shared handle to the snapshot, for the polling feed.
    pub fn snapshot(&self) -> ReportSnapshot {
        self.snapshot.clone()
    }

    pub fn tracked_devices(&self) -> BTreeSet<String> {
        self.preferences.tracked_devices().unwrap_or_default()
    }

    /// Persist the choice, then apply it to the live snapshot.
    pub async fn set_tracked(&self, device_model: &str, tracked: bool) -> Result<()> {
        self.preferences
            .set_tracked(device_model, tracked)
            .with_context(|| format!("failed to save tracking preference for {device_model:?}"))?;

        if tracked {
            self.snapshot.track(device_model).await;
        } else {
            self.snapshot.untrack(device_model).await;
        }
        Ok(())
    }

    pub async fn latest_reports(&self) -> Vec<WeatherReport> {
        self.snapshot.latest_reports().await
    }

    pub async fn load_history_for(&self, device_model: &str) -> Result<DeviceHistory> {
        self.load_history_at(device_model, Utc::now()).await
    }

    /// `load_history_for` with an explicit "now" for the recency window.
    pub async fn load_history_at(
        &self,
        device_model: &str,
        now: DateTime<Utc>,
    ) -> Result<DeviceHistory> {
        let raw = self
            .source
            .fetch_history(device_model)
            .await
            .with_context(|| format!("failed to fetch history for {device_model:?}"))?;

        let history = self
            .aggregator
            .aggregate(raw, now)
            .with_context(|| format!("invalid history for {device_model:?}"))?;

        info!(
            device_model = %device_model,
            points = history.temperature_series.len(),
            days = history.daily_extrema.len(),
            skipped = history.skipped,
            "History loaded"
        );
        Ok(history)
    }

    pub async fn device_catalog(&self) -> Result<Vec<CatalogEntry>> {
        let tracked = self.tracked_devices();
        let models = self
            .source
            .fetch_models()
            .await
            .context("failed to fetch device catalog")?;

        Ok(models
            .into_iter()
            .map(|model| CatalogEntry {
                tracked: tracked.contains(&model.device_model),
                model,
            })
            .collect())
    }
}
