use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// A single telemetry sample as served by `/reports/*`.
///
/// Field names follow the backend's JSON (`DbId`, `Time`, ...). The
/// timestamp keeps the UTC offset it was recorded with, so calendar days
/// are computed in the reporting site's local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    #[serde(rename = "DbId")]
    pub id: i64,
    #[serde(rename = "Time")]
    pub time: DateTime<FixedOffset>,
    #[serde(rename = "DeviceModel")]
    pub device_model: String,
    /// Degrees Fahrenheit
    #[serde(rename = "TemperatureInF")]
    pub temperature_f: f64,
    /// Relative humidity percentage
    #[serde(rename = "HumidityInPercentage")]
    pub humidity_pct: f64,
}

/// A `WeatherReport` whose timestamp has not been validated yet.
///
/// History batches are decoded into this shape so that one bad `Time`
/// rejects a single record rather than the whole response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawWeatherReport {
    #[serde(rename = "DbId")]
    pub id: i64,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "DeviceModel")]
    pub device_model: String,
    #[serde(rename = "TemperatureInF")]
    pub temperature_f: f64,
    #[serde(rename = "HumidityInPercentage")]
    pub humidity_pct: f64,
}

impl From<WeatherReport> for RawWeatherReport {
    fn from(r: WeatherReport) -> Self {
        Self {
            id: r.id,
            time: r.time.to_rfc3339(),
            device_model: r.device_model,
            temperature_f: r.temperature_f,
            humidity_pct: r.humidity_pct,
        }
    }
}

/// Catalog entry for a monitorable device (`GET /models`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DeviceModel")]
    pub device_model: String,
    #[serde(rename = "ReportCount")]
    pub report_count: u64,
}

/// Latest HVAC recommendation (`GET /recommendations/latest`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HvacRecommendation {
    #[serde(rename = "DbId")]
    pub id: i64,
    #[serde(rename = "Time")]
    pub time: DateTime<FixedOffset>,
    #[serde(rename = "ShouldOperateAirConditioner")]
    pub should_operate_air_conditioner: bool,
    #[serde(rename = "TemperatureToSetAirConditionerInF")]
    pub temperature_to_set_air_conditioner_f: i32,
    #[serde(rename = "ShouldWindowBeOpen")]
    pub should_window_be_open: bool,
    #[serde(rename = "WeatherDescription")]
    pub weather_description: String,
    #[serde(rename = "IndoorTemperatureF")]
    pub indoor_temperature_f: f64,
    #[serde(rename = "OutdoorTemperatureF")]
    pub outdoor_temperature_f: f64,
}

/// One row of the daily high/low table.
///
/// `low_temperature_f` and `high_humidity_pct` come from the shifted-day
/// bucket and are `None` when no report landed there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyExtremaRecord {
    pub date: NaiveDate,
    pub high_temperature_f: f64,
    pub low_temperature_f: Option<f64>,
    pub high_humidity_pct: Option<f64>,
    pub low_humidity_pct: f64,
}

/// A single chart point: report time rendered as RFC 3339 plus a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time_label: String,
    pub value: f64,
}
