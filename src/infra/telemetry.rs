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

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber (writing to stderr) and describe the cache metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(true)
            .boxed(),
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
            "bimvision_cache_hit_total",
            Unit::Count,
            "Cache lookups answered by a fresh entry, per namespace."
        );
        describe_counter!(
            "bimvision_cache_miss_total",
            Unit::Count,
            "Cache lookups that found no fresh entry, per namespace."
        );
        describe_counter!(
            "bimvision_cache_expired_total",
            Unit::Count,
            "Stale entries removed lazily on lookup, per namespace."
        );
        describe_counter!(
            "bimvision_cache_swept_total",
            Unit::Count,
            "Stale entries removed by the background sweep, per namespace."
        );
        describe_counter!(
            "bimvision_cache_evict_total",
            Unit::Count,
            "Entries evicted to respect the configured capacity, per namespace."
        );
        describe_gauge!(
            "bimvision_cache_entries",
            Unit::Count,
            "Entries currently held, per namespace."
        );
        describe_histogram!(
            "bimvision_cache_sweep_ms",
            Unit::Milliseconds,
            "Expiration sweep latency in milliseconds."
        );
    });
}
