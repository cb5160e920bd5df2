use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{signal, time};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use weather_dashboard::{
    config::Config,
    dashboard::Dashboard,
    feed::ReportFeed,
    preferences::{DevicePreferences, FileStore, KeyValueStore},
    snapshot::RecommendationSlot,
    source::{HttpReportSource, ReportSource},
};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; variables may come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let source: Arc<dyn ReportSource> = Arc::new(HttpReportSource::new(&config.api_base_url)?);

    let store = FileStore::open(&config.preferences_path).with_context(|| {
        format!(
            "failed to open preference store at {}",
            config.preferences_path.display()
        )
    })?;
    let preferences = DevicePreferences::new(store);
    for device in &config.tracked_devices {
        preferences.set_tracked(device, true)?;
    }

    let dashboard = Arc::new(Dashboard::new(
        source.clone(),
        preferences,
        config.aggregator(),
    ));
    info!(tracked = ?dashboard.tracked_devices(), "Dashboard ready");

    match dashboard.device_catalog().await {
        Ok(catalog) => {
            for entry in catalog {
                info!(
                    device_model = %entry.model.device_model,
                    name = %entry.model.name,
                    reports = entry.model.report_count,
                    tracked = entry.tracked,
                    "Known device"
                );
            }
        }
        Err(e) => warn!(error = %format!("{e:#}"), "Failed to load device catalog"),
    }

    // Latest-report feed, also refreshing the HVAC recommendation each tick
    let recommendation = RecommendationSlot::new();
    let feed = ReportFeed::new(source, dashboard.snapshot(), config.feed())
        .with_recommendations(recommendation.clone())
        .start();

    let summary = tokio::spawn(summary_loop(
        dashboard.clone(),
        recommendation,
        Duration::from_secs(config.summary_interval_secs),
    ));
    let history = tokio::spawn(history_loop(
        dashboard,
        Duration::from_secs(config.history_refresh_secs),
    ));

    match shutdown_signal().await {
        Ok(name) => info!(signal = name, "Shutting down"),
        Err(e) => warn!(error = %format!("{e:#}"), "Signal handling failed; shutting down"),
    }

    feed.stop().await;
    summary.abort();
    history.abort();

    Ok(())
}

/// Periodically logs what the home summary view would show.
async fn summary_loop<S: KeyValueStore>(
    dashboard: Arc<Dashboard<S>>,
    recommendation: RecommendationSlot,
    interval: Duration,
) {
    let mut ticker = time::interval(interval);
    loop {
        ticker.tick().await;

        let reports = dashboard.latest_reports().await;
        if reports.is_empty() {
            info!("No reports for tracked devices yet");
        }
        for r in &reports {
            info!(
                device_model = %r.device_model,
                time = %r.time,
                temperature_f = r.temperature_f,
                humidity_pct = r.humidity_pct,
                "Latest report"
            );
        }

        if let Some(rec) = recommendation.get().await {
            info!(
                air_conditioner = rec.should_operate_air_conditioner,
                setpoint_f = rec.temperature_to_set_air_conditioner_f,
                window_open = rec.should_window_be_open,
                indoor_f = rec.indoor_temperature_f,
                outdoor_f = rec.outdoor_temperature_f,
                description = %rec.weather_description,
                "HVAC recommendation"
            );
        }
    }
}

/// Periodically reloads history of every tracked device and logs the
/// daily high/low table.
async fn history_loop<S: KeyValueStore>(dashboard: Arc<Dashboard<S>>, interval: Duration) {
    let mut ticker = time::interval(interval);
    loop {
        ticker.tick().await;

        for device in dashboard.tracked_devices() {
            match dashboard.load_history_for(&device).await {
                Ok(history) => {
                    for day in &history.daily_extrema {
                        info!(
                            device_model = %device,
                            date = %day.date,
                            high_f = day.high_temperature_f,
                            low_f = ?day.low_temperature_f,
                            high_humidity = ?day.high_humidity_pct,
                            low_humidity = day.low_humidity_pct,
                            "Daily high/low"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(device_model = %device, error = %format!("{e:#}"), "Failed to load history");
                }
            }
        }
    }
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use signal::unix::SignalKind;

        let mut terminate = signal::unix::signal(SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.map(|_| "SIGINT").context("failed to listen for Ctrl+C"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        Ok("Ctrl+C")
    }
}
