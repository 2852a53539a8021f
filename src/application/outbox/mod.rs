//! Background delivery of committed outbox rows.

mod processor;
mod publisher;

pub use processor::{
    CycleReport, METRIC_OUTBOX_CYCLE_MS, METRIC_OUTBOX_DEAD_LETTERED_TOTAL,
    METRIC_OUTBOX_FAILED_TOTAL, METRIC_OUTBOX_PUBLISHED_TOTAL, METRIC_OUTBOX_PURGED_TOTAL,
    OutboxProcessor, OutboxProcessorHandle, ProcessorConfig, ProcessorState,
};
pub use publisher::{MessagePublisher, PublishError};
