use async_trait::async_trait;
use tracing::info;

use crate::application::outbox::{MessagePublisher, PublishError};

/// Writes each event to the log instead of a broker.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessagePublisher for LogPublisher {
    async fn publish(&self, event_type: &str, payload: &str) -> Result<(), PublishError> {
        info!(
            target = "infra::messaging::log",
            event_type,
            payload,
            "Published domain event"
        );
        Ok(())
    }
}
