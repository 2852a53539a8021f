use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::outbox::{
    METRIC_OUTBOX_CYCLE_MS, METRIC_OUTBOX_DEAD_LETTERED_TOTAL, METRIC_OUTBOX_FAILED_TOTAL,
    METRIC_OUTBOX_PUBLISHED_TOTAL, METRIC_OUTBOX_PURGED_TOTAL,
};
use crate::cache::{
    METRIC_CACHE_ERROR_TOTAL, METRIC_CACHE_EVICT_TOTAL, METRIC_CACHE_HIT_TOTAL,
    METRIC_CACHE_INVALIDATED_TOTAL, METRIC_CACHE_MISS_TOTAL,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

const COUNTERS: &[(&str, &str)] = &[
    (METRIC_CACHE_HIT_TOTAL, "Item list pages served from the cache."),
    (METRIC_CACHE_MISS_TOTAL, "Item list pages loaded from the store."),
    (
        METRIC_CACHE_ERROR_TOTAL,
        "Cache backend failures that fell back to the store.",
    ),
    (
        METRIC_CACHE_EVICT_TOTAL,
        "In-memory cache entries evicted to stay under capacity.",
    ),
    (
        METRIC_CACHE_INVALIDATED_TOTAL,
        "Cached keys removed after a committed write.",
    ),
    (
        METRIC_OUTBOX_PUBLISHED_TOTAL,
        "Outbox messages accepted by the broker.",
    ),
    (METRIC_OUTBOX_FAILED_TOTAL, "Failed outbox publish attempts."),
    (
        METRIC_OUTBOX_DEAD_LETTERED_TOTAL,
        "Outbox messages parked after their last allowed attempt.",
    ),
    (
        METRIC_OUTBOX_PURGED_TOTAL,
        "Processed outbox rows deleted after the retention window.",
    ),
];

/// Installs the global subscriber. Fails if one is already set.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (name, description) in COUNTERS {
            describe_counter!(*name, Unit::Count, *description);
        }
        describe_histogram!(
            METRIC_OUTBOX_CYCLE_MS,
            Unit::Milliseconds,
            "Wall time of one outbox processor cycle."
        );
    });
}
