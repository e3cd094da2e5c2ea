use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cachefront_store_op_failed_total",
            Unit::Count,
            "Cache store operations that failed or timed out and returned their fallback."
        );
        describe_counter!(
            "cachefront_response_cache_total",
            Unit::Count,
            "Response-cache decisions by outcome (hit, miss, bypass, not_modified)."
        );
        describe_counter!(
            "cachefront_rate_limit_rejected_total",
            Unit::Count,
            "Requests rejected by the fixed-window rate limiter."
        );
        describe_counter!(
            "cachefront_invalidation_total",
            Unit::Count,
            "Pattern invalidations after successful mutations, by outcome."
        );
    });
}
