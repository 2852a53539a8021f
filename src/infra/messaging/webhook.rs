use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url, header::CONTENT_TYPE};
use tracing::debug;

use crate::application::outbox::{MessagePublisher, PublishError};

pub const EVENT_TYPE_HEADER: &str = "x-event-type";

/// Longest slice of a rejection body carried into `last_error`.
const MAX_REJECTION_BODY_CHARS: usize = 512;

/// POSTs each payload to one endpoint. Any non-2xx status is a failed publish.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: Client,
    endpoint: Url,
}

impl WebhookPublisher {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, PublishError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| PublishError::Unavailable(format!("invalid webhook url: {err}")))?;
        let client = Client::builder()
            .user_agent(concat!("itemsvc/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| PublishError::Unavailable(err.to_string()))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl MessagePublisher for WebhookPublisher {
    async fn publish(&self, event_type: &str, payload: &str) -> Result<(), PublishError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(EVENT_TYPE_HEADER, event_type)
            .body(payload.to_string())
            .send()
            .await
            .map_err(|err| PublishError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                event_type: event_type.to_string(),
                reason: format!("status {status} body {}", excerpt(&body)),
            });
        }

        debug!(
            target = "infra::messaging::webhook",
            event_type,
            status = status.as_u16(),
            "Webhook accepted event"
        );
        Ok(())
    }
}

fn excerpt(body: &str) -> String {
    match body.char_indices().nth(MAX_REJECTION_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_endpoint() {
        let err = WebhookPublisher::new("not a url", Duration::from_secs(1)).expect_err("invalid");
        assert!(err.to_string().contains("invalid webhook url"));
    }

    #[test]
    fn keeps_configured_endpoint() {
        let publisher =
            WebhookPublisher::new("http://127.0.0.1:9/hooks/items", Duration::from_secs(1))
                .expect("valid");
        assert_eq!(publisher.endpoint().path(), "/hooks/items");
    }

    #[test]
    fn long_rejection_body_is_cut_on_a_char_boundary() {
        let body = "é".repeat(MAX_REJECTION_BODY_CHARS + 40);
        let short = excerpt(&body);
        assert!(short.ends_with("..."));
        assert_eq!(short.chars().count(), MAX_REJECTION_BODY_CHARS + 3);

        assert_eq!(excerpt("unknown event"), "unknown event");
    }
}
