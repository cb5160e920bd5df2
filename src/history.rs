use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{DailyExtremaRecord, RawWeatherReport, SeriesPoint, WeatherReport};

/// Trailing span of history shown on the charts when nothing else is configured.
pub const DEFAULT_WINDOW_DAYS: u32 = 3;

/// Low temperature and high humidity are taken over a day that starts at
/// local noon, so an overnight low is attributed to the preceding day.
const SHIFTED_DAY_OFFSET_HOURS: i64 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("report {id}: invalid timestamp {time:?}: {reason}")]
    InvalidTimestamp {
        id: i64,
        time: String,
        reason: String,
    },
}

/// What to do with a history record that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvalidRecordPolicy {
    /// Log the record and continue with the rest of the batch.
    #[default]
    Skip,
    /// Fail the whole batch on the first invalid record.
    Abort,
}

/// Result of aggregating one device's history batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceHistory {
    pub temperature_series: Vec<SeriesPoint>,
    pub humidity_series: Vec<SeriesPoint>,
    pub daily_extrema: Vec<DailyExtremaRecord>,
    /// Records dropped under `InvalidRecordPolicy::Skip`.
    pub skipped: usize,
}

impl TryFrom<RawWeatherReport> for WeatherReport {
    type Error = ValidationError;

    fn try_from(raw: RawWeatherReport) -> Result<Self, Self::Error> {
        let time = DateTime::parse_from_rfc3339(raw.time.trim()).map_err(|e| {
            ValidationError::InvalidTimestamp {
                id: raw.id,
                time: raw.time.clone(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            id: raw.id,
            time,
            device_model: raw.device_model,
            temperature_f: raw.temperature_f,
            humidity_pct: raw.humidity_pct,
        })
    }
}

/// Validate every record's timestamp, applying `policy` to failures.
///
/// Returns the valid reports in input order together with the number of
/// records that were skipped.
pub fn parse_reports(
    raw: Vec<RawWeatherReport>,
    policy: InvalidRecordPolicy,
) -> Result<(Vec<WeatherReport>, usize), ValidationError> {
    let mut reports = Vec::with_capacity(raw.len());
    let mut skipped = 0;

    for record in raw {
        match WeatherReport::try_from(record) {
            Ok(report) => reports.push(report),
            Err(e) if policy == InvalidRecordPolicy::Skip => {
                warn!(error = %e, "Skipping invalid history record");
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok((reports, skipped))
}

/// Keep reports with `time >= now - window_days`. Input order is preserved.
/// A window reaching past the earliest representable instant keeps everything.
pub fn filter_recent(
    reports: &[WeatherReport],
    window_days: u32,
    now: DateTime<Utc>,
) -> Vec<WeatherReport> {
    let cutoff = now
        .checked_sub_signed(TimeDelta::days(i64::from(window_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    reports
        .iter()
        .filter(|r| r.time.with_timezone(&Utc) >= cutoff)
        .cloned()
        .collect()
}

pub fn temperature_series(reports: &[WeatherReport]) -> Vec<SeriesPoint> {
    series(reports, |r| r.temperature_f)
}

pub fn humidity_series(reports: &[WeatherReport]) -> Vec<SeriesPoint> {
    series(reports, |r| r.humidity_pct)
}

fn series(reports: &[WeatherReport], value: impl Fn(&WeatherReport) -> f64) -> Vec<SeriesPoint> {
    reports
        .iter()
        .map(|r| SeriesPoint {
            time_label: r.time.to_rfc3339(),
            value: value(r),
        })
        .collect()
}

/// Running min/max of one calendar-day bucket.
#[derive(Debug, Clone, Copy)]
struct Extrema {
    min_temperature_f: f64,
    max_temperature_f: f64,
    min_humidity_pct: f64,
    max_humidity_pct: f64,
}

impl Extrema {
    fn new(r: &WeatherReport) -> Self {
        Self {
            min_temperature_f: r.temperature_f,
            max_temperature_f: r.temperature_f,
            min_humidity_pct: r.humidity_pct,
            max_humidity_pct: r.humidity_pct,
        }
    }

    fn add(&mut self, r: &WeatherReport) {
        self.min_temperature_f = self.min_temperature_f.min(r.temperature_f);
        self.max_temperature_f = self.max_temperature_f.max(r.temperature_f);
        self.min_humidity_pct = self.min_humidity_pct.min(r.humidity_pct);
        self.max_humidity_pct = self.max_humidity_pct.max(r.humidity_pct);
    }
}

/// Bucket reports by the local calendar date of `time - shift`.
fn group_by_day(reports: &[WeatherReport], shift: TimeDelta) -> BTreeMap<NaiveDate, Extrema> {
    let mut buckets: BTreeMap<NaiveDate, Extrema> = BTreeMap::new();
    for r in reports {
        let date = (r.time - shift).date_naive();
        buckets
            .entry(date)
            .and_modify(|e| e.add(r))
            .or_insert_with(|| Extrema::new(r));
    }
    buckets
}

/// Daily high/low table, one record per calendar day present in `reports`,
/// sorted ascending by date.
///
/// High temperature and low humidity come from the midnight-to-midnight
/// bucket. Low temperature and high humidity come from the noon-to-noon
/// bucket keyed by the same date and are `None` when that bucket is empty.
pub fn compute_daily_extrema(reports: &[WeatherReport]) -> Vec<DailyExtremaRecord> {
    let by_day = group_by_day(reports, TimeDelta::zero());
    let by_shifted_day = group_by_day(reports, TimeDelta::hours(SHIFTED_DAY_OFFSET_HOURS));

    by_day
        .into_iter()
        .map(|(date, day)| {
            let shifted = by_shifted_day.get(&date);
            DailyExtremaRecord {
                date,
                high_temperature_f: day.max_temperature_f,
                low_temperature_f: shifted.map(|e| e.min_temperature_f),
                high_humidity_pct: shifted.map(|e| e.max_humidity_pct),
                low_humidity_pct: day.min_humidity_pct,
            }
        })
        .collect()
}

/// Turns a raw history batch into chart series and the daily high/low table.
#[derive(Debug, Clone, Copy)]
pub struct HistoryAggregator {
    window_days: u32,
    policy: InvalidRecordPolicy,
}

impl Default for HistoryAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_DAYS, InvalidRecordPolicy::default())
    }
}

impl HistoryAggregator {
    pub fn new(window_days: u32, policy: InvalidRecordPolicy) -> Self {
        Self { window_days, policy }
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    /// Series are built from the recency window; extrema use every valid record.
    pub fn aggregate(
        &self,
        raw: Vec<RawWeatherReport>,
        now: DateTime<Utc>,
    ) -> Result<DeviceHistory, ValidationError> {
        let total = raw.len();
        let (reports, skipped) = parse_reports(raw, self.policy)?;
        let recent = filter_recent(&reports, self.window_days, now);

        debug!(
            total,
            skipped,
            recent = recent.len(),
            window_days = self.window_days,
            "Aggregated history batch"
        );

        Ok(DeviceHistory {
            temperature_series: temperature_series(&recent),
            humidity_series: humidity_series(&recent),
            daily_extrema: compute_daily_extrema(&reports),
            skipped,
        })
    }
}
