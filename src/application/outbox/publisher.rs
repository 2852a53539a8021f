use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("broker rejected `{event_type}`: {reason}")]
    Rejected { event_type: String, reason: String },
}

/// Hands one event to the external broker.
///
/// Delivery is at-least-once: a row whose publish succeeded but whose
/// processed mark was lost is published again on a later cycle.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, event_type: &str, payload: &str) -> Result<(), PublishError>;
}
