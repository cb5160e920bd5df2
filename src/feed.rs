use std::{sync::Arc, time::Duration};

use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    models::{HvacRecommendation, WeatherReport},
    snapshot::{RecommendationSlot, ReportSnapshot},
    source::ReportSource,
};

/// Buffered events per subscriber before the oldest ones are dropped.
const EVENT_CAPACITY: usize = 64;

/// How a failed fetch is retried within one poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_delay: Duration,
    /// `None` retries until the fetch succeeds or the next tick supersedes it.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    pub fn indefinite(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl FeedConfig {
    /// Fixed-rate polling every `poll_interval`, retrying indefinitely with
    /// the same delay.
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            retry: RetryPolicy::indefinite(poll_interval),
        }
    }
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A report arrived, whether or not its device is tracked.
    Report(WeatherReport),
    /// A fetch of the latest report failed; `attempt` counts from 1 within a tick.
    FetchFailed { attempt: u32, error: String },
    Recommendation(HvacRecommendation),
}

/// Polls `ReportSource::fetch_latest` at a fixed rate and feeds the results
/// into a `ReportSnapshot`.
///
/// At most one fetch is in flight. When the next tick fires while a fetch
/// or its retries are still pending, that work is dropped and a fresh
/// fetch starts.
pub struct ReportFeed {
    source: Arc<dyn ReportSource>,
    snapshot: ReportSnapshot,
    recommendation: Option<RecommendationSlot>,
    events: broadcast::Sender<FeedEvent>,
    config: FeedConfig,
}

impl ReportFeed {
    pub fn new(source: Arc<dyn ReportSource>, snapshot: ReportSnapshot, config: FeedConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            snapshot,
            recommendation: None,
            events,
            config,
        }
    }

    /// Also refresh `slot` with the latest HVAC recommendation on every tick.
    pub fn with_recommendations(mut self, slot: RecommendationSlot) -> Self {
        self.recommendation = Some(slot);
        self
    }

    /// Subscribe before `start` to see the very first report.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Spawn the polling loop. The first fetch happens immediately.
    pub fn start(self) -> FeedHandle {
        let events = self.events.clone();
        let task = tokio::spawn(self.run());
        FeedHandle { task, events }
    }

    async fn run(self) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            retry_delay_secs = self.config.retry.retry_delay.as_secs(),
            max_retries = ?self.config.retry.max_retries,
            "Report polling loop started"
        );

        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            let finished = tokio::select! {
                biased;
                _ = ticker.tick() => false,
                _ = self.poll_once() => true,
            };

            if finished {
                ticker.tick().await;
            } else {
                debug!("Poll still pending at next tick; superseding it");
            }
        }
    }

    async fn poll_once(&self) {
        self.poll_latest().await;
        if let Some(slot) = &self.recommendation {
            self.refresh_recommendation(slot).await;
        }
    }

    async fn poll_latest(&self) {
        let retry = self.config.retry;
        let mut attempt = 1;

        loop {
            match self.source.fetch_latest(None).await {
                Ok(report) => {
                    self.apply(report).await;
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to fetch latest report");
                    let _ = self.events.send(FeedEvent::FetchFailed {
                        attempt,
                        error: format!("{e:#}"),
                    });

                    if retry.max_retries.is_some_and(|max| attempt > max) {
                        warn!(attempt, "Retry budget exhausted; waiting for next tick");
                        return;
                    }
                }
            }

            time::sleep(retry.retry_delay).await;
            attempt += 1;
        }
    }

    async fn apply(&self, report: WeatherReport) {
        let device_model = report.device_model.clone();
        let stored = self.snapshot.observe(report.clone()).await;

        if stored {
            info!(
                device_model = %device_model,
                temperature_f = report.temperature_f,
                humidity_pct = report.humidity_pct,
                "Latest report updated"
            );
        } else {
            debug!(device_model = %device_model, "Report for untracked device ignored");
        }

        let _ = self.events.send(FeedEvent::Report(report));
    }

    async fn refresh_recommendation(&self, slot: &RecommendationSlot) {
        match self.source.fetch_latest_recommendation().await {
            Ok(recommendation) => {
                slot.replace(recommendation.clone()).await;
                let _ = self.events.send(FeedEvent::Recommendation(recommendation));
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch HVAC recommendation; keeping previous one");
            }
        }
    }
}

/// Running feed. Dropping the handle leaves the feed running; call `stop`.
pub struct FeedHandle {
    task: JoinHandle<()>,
    events: broadcast::Sender<FeedEvent>,
}

impl FeedHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Cancel the feed and wait for the task to wind down. Once this returns
    /// the snapshot is no longer touched and no events are emitted; a fetch
    /// that was in flight is dropped along with its result.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
        info!("Report polling loop stopped");
    }
}
