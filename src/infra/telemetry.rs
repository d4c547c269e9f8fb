use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

pub const REQUESTS_TOTAL: &str = "xrechnung_requests_total";
pub const TRANSFORM_MS: &str = "xrechnung_transform_ms";
pub const RENDER_MS: &str = "xrechnung_render_ms";
pub const RENDER_INFLIGHT: &str = "xrechnung_render_inflight";
pub const RENDER_REJECTED_TOTAL: &str = "xrechnung_render_rejected_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
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
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric descriptions with whichever recorder is installed.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            REQUESTS_TOTAL,
            Unit::Count,
            "Pipeline requests by operation and outcome kind."
        );
        describe_histogram!(
            TRANSFORM_MS,
            Unit::Milliseconds,
            "HTML preview transformation latency in milliseconds."
        );
        describe_histogram!(
            RENDER_MS,
            Unit::Milliseconds,
            "PDF render latency in milliseconds, including the XSL-FO stage."
        );
        describe_gauge!(
            RENDER_INFLIGHT,
            Unit::Count,
            "PDF renders currently holding a concurrency permit."
        );
        describe_counter!(
            RENDER_REJECTED_TOTAL,
            Unit::Count,
            "PDF render requests turned away because every permit was taken."
        );
    });
}
