use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::RwLock;

use crate::models::{HvacRecommendation, WeatherReport};

#[derive(Debug, Default)]
struct Inner {
    tracked: HashSet<String>,
    latest: HashMap<String, WeatherReport>,
}

/// In-memory store of the most recent `WeatherReport` per tracked device.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// The tracked set and the latest map live under one `tokio::sync::RwLock`,
/// so the membership check and the write happen atomically.
#[derive(Clone, Default)]
pub struct ReportSnapshot {
    inner: Arc<RwLock<Inner>>,
}

impl ReportSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracked<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inner = Inner {
            tracked: devices.into_iter().map(Into::into).collect(),
            latest: HashMap::new(),
        };
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Start tracking `device_model`. Tracking an already tracked device is a no-op.
    pub async fn track(&self, device_model: &str) {
        self.inner.write().await.tracked.insert(device_model.to_owned());
    }

    /// Stop tracking `device_model` and forget its latest report.
    pub async fn untrack(&self, device_model: &str) {
        let mut inner = self.inner.write().await;
        inner.tracked.remove(device_model);
        inner.latest.remove(device_model);
    }

    pub async fn is_tracked(&self, device_model: &str) -> bool {
        self.inner.read().await.tracked.contains(device_model)
    }

    /// Overwrite the latest report for `report.device_model` if that device
    /// is tracked. Returns whether the snapshot changed.
    pub async fn observe(&self, report: WeatherReport) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.tracked.contains(&report.device_model) {
            return false;
        }
        inner.latest.insert(report.device_model.clone(), report);
        true
    }

    /// Latest report of every tracked device that has reported at least once.
    /// Order is unspecified.
    pub async fn latest_reports(&self) -> Vec<WeatherReport> {
        self.inner.read().await.latest.values().cloned().collect()
    }

    pub async fn get(&self, device_model: &str) -> Option<WeatherReport> {
        self.inner.read().await.latest.get(device_model).cloned()
    }
}

/// Holds the last successfully fetched `HvacRecommendation`.
#[derive(Clone, Default)]
pub struct RecommendationSlot {
    inner: Arc<RwLock<Option<HvacRecommendation>>>,
}

impl RecommendationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn replace(&self, recommendation: HvacRecommendation) {
        *self.inner.write().await = Some(recommendation);
    }

    pub async fn get(&self) -> Option<HvacRecommendation> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta};

    use super::*;

    fn make_report(device_model: &str, id: i64, temperature_f: f64) -> WeatherReport {
        let base = DateTime::parse_from_rfc3339("2024-07-01T12:00:00Z").unwrap();
        WeatherReport {
            id,
            time: base + TimeDelta::minutes(id),
            device_model: device_model.to_owned(),
            temperature_f,
            humidity_pct: 50.0,
        }
    }

    #[tokio::test]
    async fn empty_snapshot_returns_nothing() {
        let snapshot = ReportSnapshot::with_tracked(["X"]);
        assert!(snapshot.latest_reports().await.is_empty());
        assert!(snapshot.get("X").await.is_none());
    }

    #[tokio::test]
    async fn tracked_report_is_stored() {
        let snapshot = ReportSnapshot::with_tracked(["X"]);
        assert!(snapshot.observe(make_report("X", 1, 70.0)).await);

        let got = snapshot.get("X").await.unwrap();
        assert_eq!(got.temperature_f, 70.0);
    }

    #[tokio::test]
    async fn untracked_report_is_discarded() {
        let snapshot = ReportSnapshot::with_tracked(["X"]);
        snapshot.observe(make_report("X", 1, 70.0)).await;

        assert!(!snapshot.observe(make_report("Y", 2, 90.0)).await);
        let all = snapshot.latest_reports().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].device_model, "X");
    }

    #[tokio::test]
    async fn observe_overwrites_previous_report() {
        let snapshot = ReportSnapshot::with_tracked(["X"]);
        snapshot.observe(make_report("X", 2, 70.0)).await;
        // arrival order wins, even for an older timestamp
        snapshot.observe(make_report("X", 1, 65.0)).await;

        assert_eq!(snapshot.get("X").await.unwrap().id, 1);
        assert_eq!(snapshot.latest_reports().await.len(), 1);
    }

    #[tokio::test]
    async fn different_devices_are_separate_entries() {
        let snapshot = ReportSnapshot::with_tracked(["X", "Y"]);
        snapshot.observe(make_report("X", 1, 70.0)).await;
        snapshot.observe(make_report("Y", 2, 55.0)).await;

        assert_eq!(snapshot.latest_reports().await.len(), 2);
        assert_eq!(snapshot.get("Y").await.unwrap().temperature_f, 55.0);
    }

    #[tokio::test]
    async fn track_twice_is_idempotent_and_untrack_forgets() {
        let snapshot = ReportSnapshot::new();
        snapshot.track("X").await;
        snapshot.track("X").await;
        assert!(snapshot.is_tracked("X").await);

        snapshot.observe(make_report("X", 1, 70.0)).await;
        snapshot.untrack("X").await;

        assert!(!snapshot.is_tracked("X").await);
        assert!(snapshot.latest_reports().await.is_empty());
        assert!(!snapshot.observe(make_report("X", 2, 71.0)).await);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let snapshot = ReportSnapshot::with_tracked(["X"]);
        let clone = snapshot.clone();

        snapshot.observe(make_report("X", 1, 70.0)).await;
        assert_eq!(clone.get("X").await.unwrap().temperature_f, 70.0);
    }

    #[tokio::test]
    async fn recommendation_slot_keeps_latest() {
        let slot = RecommendationSlot::new();
        assert!(slot.get().await.is_none());

        let rec = HvacRecommendation {
            id: 1,
            time: DateTime::parse_from_rfc3339("2024-07-01T12:00:00Z").unwrap(),
            should_operate_air_conditioner: false,
            temperature_to_set_air_conditioner_f: 76,
            should_window_be_open: true,
            weather_description: "Mild".to_owned(),
            indoor_temperature_f: 72.0,
            outdoor_temperature_f: 68.0,
        };
        slot.replace(rec.clone()).await;
        assert_eq!(slot.get().await, Some(rec));
    }
}
