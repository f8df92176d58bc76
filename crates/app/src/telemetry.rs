use std::{
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use boss_util::{AppConfig, Environment};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to initialize prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

static METRICS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);
static START_TIME: OnceLock<Instant> = OnceLock::new();

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs the global subscriber: pretty output while developing, JSON lines in production.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let production = config.environment == Environment::Production;

    let pretty = (!production).then(|| {
        tracing_fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .pretty()
    });
    let json = production.then(|| {
        tracing_fmt::layer()
            .with_target(false)
            .with_timer(UtcTime::rfc_3339())
            .json()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(pretty)
        .with(json)
        .try_init()?;

    tracing::info!(
        stage = "telemetry",
        env = %config.environment.as_str(),
        version = BUILD_VERSION,
        "tracing initialized"
    );
    Ok(())
}

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let mut installed = METRICS_HANDLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = installed.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *installed = Some(handle.clone());

    describe_gauge!("app_build_info", "Build metadata for the running binary");
    describe_gauge!("app_uptime_seconds", "Seconds since the process started");
    describe_counter!(
        "http_validation_rejections_total",
        "Writes rejected by business rules, labelled by problem type"
    );
    describe_counter!(
        "vacation_recomputations_total",
        "Vacation balance recomputations triggered by absence changes"
    );
    describe_counter!(
        "progress_rollups_total",
        "Story and initiative progress rollups, labelled by trigger"
    );
    describe_counter!("quarter_activations_total", "Quarters switched to active");

    gauge!("app_build_info", "version" => BUILD_VERSION).set(1.0);
    START_TIME.get_or_init(Instant::now);

    Ok(handle)
}

/// Renders the exposition text with a fresh uptime sample.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or_default();
    gauge!("app_uptime_seconds").set(uptime);
    handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_recorder_is_installed_once() {
        let first = init_metrics().expect("first init");
        let second = init_metrics().expect("second init");

        metrics::counter!("quarter_activations_total").increment(1);
        let rendered = render_metrics(&second);
        assert!(rendered.contains("app_build_info"));
        assert!(rendered.contains(&format!("version=\"{BUILD_VERSION}\"")));
        assert!(rendered.contains("app_uptime_seconds"));
        assert!(render_metrics(&first).contains("quarter_activations_total"));
    }
}
