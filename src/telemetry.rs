use std::sync::Once;

use metrics::{Unit, describe_counter};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::{
    METRIC_CACHE_BACKEND_ERROR, METRIC_CACHE_BUILDER_ERROR, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
};
use crate::config::{LogFormat, LoggingSettings};
use crate::limiter::{METRIC_LIMITER_ALLOWED, METRIC_LIMITER_FAIL_OPEN, METRIC_LIMITER_REJECTED};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("telemetry initialization failed: {0}")]
pub struct TelemetryError(String);

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError(format!("failed to install tracing subscriber: {err}")))
}

/// Register metric descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_LIMITER_ALLOWED,
            Unit::Count,
            "Requests admitted by a rate-limit policy."
        );
        describe_counter!(
            METRIC_LIMITER_REJECTED,
            Unit::Count,
            "Requests rejected for exceeding a rate-limit policy."
        );
        describe_counter!(
            METRIC_LIMITER_FAIL_OPEN,
            Unit::Count,
            "Requests admitted uncounted because the backend failed."
        );
        describe_counter!(
            METRIC_CACHE_HIT,
            Unit::Count,
            "Total number of fetch-or-compute cache hits."
        );
        describe_counter!(
            METRIC_CACHE_MISS,
            Unit::Count,
            "Total number of fetch-or-compute cache misses."
        );
        describe_counter!(
            METRIC_CACHE_BACKEND_ERROR,
            Unit::Count,
            "Cache operations that fell through because the backend failed."
        );
        describe_counter!(
            METRIC_CACHE_BUILDER_ERROR,
            Unit::Count,
            "Cache misses whose builder returned an error."
        );
    });
}
