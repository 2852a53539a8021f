//! Broker adapters for the outbox processor.

mod log;
mod webhook;

use std::sync::Arc;

pub use log::LogPublisher;
pub use webhook::WebhookPublisher;

use crate::application::outbox::MessagePublisher;
use crate::config::{MessagingSettings, PublisherKind};
use crate::infra::error::InfraError;

/// Builds the publisher selected by configuration.
pub fn build_publisher(
    settings: &MessagingSettings,
) -> Result<Arc<dyn MessagePublisher>, InfraError> {
    match settings.publisher {
        PublisherKind::Log => Ok(Arc::new(LogPublisher::new())),
        PublisherKind::Webhook => {
            let url = settings.webhook_url.as_deref().ok_or_else(|| {
                InfraError::configuration(
                    "messaging.webhook_url is required when messaging.publisher is webhook",
                )
            })?;
            let publisher = WebhookPublisher::new(url, settings.webhook_timeout)
                .map_err(|err| InfraError::configuration(err.to_string()))?;
            Ok(Arc::new(publisher))
        }
    }
}
