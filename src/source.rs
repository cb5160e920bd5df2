use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{DeviceModel, HvacRecommendation, RawWeatherReport, WeatherReport};

/// Backend that serves weather reports, the device catalog and HVAC
/// recommendations. Transport, endpoint layout and transport-level
/// retries are the implementation's business.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Newest report overall (`None`) or for one device (`Some`).
    async fn fetch_latest(&self, device_model: Option<&str>) -> Result<WeatherReport>;

    /// Historical reports for one device, timestamps not yet validated.
    async fn fetch_history(&self, device_model: &str) -> Result<Vec<RawWeatherReport>>;

    async fn fetch_models(&self) -> Result<Vec<DeviceModel>>;

    async fn fetch_latest_recommendation(&self) -> Result<HvacRecommendation>;
}

#[derive(Debug, Clone)]
pub struct HttpReportSource {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: Url,
}

impl HttpReportSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid dashboard API base URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("dashboard API base URL cannot carry a path: {base_url}"));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                http: Client::new(),
                base_url,
            }),
        })
    }

    /// Append `segments` to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("dashboard API base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "GET");

        let bytes = self
            .inner
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned error status"))?
            .bytes()
            .await
            .with_context(|| format!("failed to read response body from {url}"))?;

        serde_json::from_slice::<T>(&bytes)
            .with_context(|| format!("failed to deserialize response from {url}"))
    }
}

#[async_trait]
impl ReportSource for HttpReportSource {
    async fn fetch_latest(&self, device_model: Option<&str>) -> Result<WeatherReport> {
        let Some(device_model) = device_model else {
            return self.get_json(&["reports", "latest"]).await;
        };

        self.fetch_history(device_model)
            .await?
            .into_iter()
            .filter_map(|r| WeatherReport::try_from(r).ok())
            .max_by_key(|r| r.time)
            .with_context(|| format!("no valid reports for device {device_model:?}"))
    }

    async fn fetch_history(&self, device_model: &str) -> Result<Vec<RawWeatherReport>> {
        self.get_json(&["reports", device_model]).await
    }

    async fn fetch_models(&self) -> Result<Vec<DeviceModel>> {
        self.get_json(&["models"]).await
    }

    async fn fetch_latest_recommendation(&self) -> Result<HvacRecommendation> {
        self.get_json(&["recommendations", "latest"]).await
    }
}
