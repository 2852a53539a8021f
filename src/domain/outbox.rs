//! Outbox rows and per-row delivery outcomes.

use std::num::NonZeroU32;

use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::events::{DomainEvent, EventCodecError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxMessage {
    pub id: i64,
    pub event_type: String,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// A pending row whose failed attempts reached the cap is parked for an operator.
    pub fn is_dead_lettered(&self, max_attempts: Option<NonZeroU32>) -> bool {
        match max_attempts {
            Some(max) => self.is_pending() && attempts_reached(self.attempts, max),
            None => false,
        }
    }

    pub fn decode(&self) -> Result<DomainEvent, EventCodecError> {
        DomainEvent::decode(&self.event_type, &self.content)
    }
}

pub(crate) fn attempts_reached(attempts: i32, max: NonZeroU32) -> bool {
    i64::from(attempts) >= i64::from(max.get())
}

/// A row to be written inside the business transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxMessage {
    pub event_type: &'static str,
    pub content: String,
    pub created_at: OffsetDateTime,
}

impl NewOutboxMessage {
    pub fn from_event(
        event: &DomainEvent,
        created_at: OffsetDateTime,
    ) -> Result<Self, EventCodecError> {
        Ok(Self {
            event_type: event.type_tag(),
            content: event.encode()?,
            created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { id: i64, at: OffsetDateTime },
    Failed { id: i64, error: String },
}

impl DeliveryOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Delivered { id, .. } | Self::Failed { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn message(attempts: i32, processed: bool) -> OutboxMessage {
        OutboxMessage {
            id: 1,
            event_type: DomainEvent::ITEM_CREATED_V1.to_string(),
            content: "{}".to_string(),
            created_at: datetime!(2024-01-01 00:00 UTC),
            processed_at: processed.then(|| datetime!(2024-01-01 00:01 UTC)),
            attempts,
            last_error: None,
        }
    }

    #[test]
    fn dead_letter_requires_a_cap() {
        assert!(!message(1_000, false).is_dead_lettered(None));
    }

    #[test]
    fn dead_letter_when_attempts_reach_cap() {
        let cap = NonZeroU32::new(3);
        assert!(!message(2, false).is_dead_lettered(cap));
        assert!(message(3, false).is_dead_lettered(cap));
    }

    #[test]
    fn processed_rows_are_never_dead_lettered() {
        assert!(!message(10, true).is_dead_lettered(NonZeroU32::new(3)));
    }

    #[test]
    fn new_message_carries_tag_and_payload() {
        let event = DomainEvent::item_updated(4, datetime!(2024-05-05 10:00 UTC));
        let row = NewOutboxMessage::from_event(&event, datetime!(2024-05-05 10:00 UTC))
            .expect("encode");

        assert_eq!(row.event_type, "ItemUpdatedV1");
        assert_eq!(
            DomainEvent::decode(row.event_type, &row.content).expect("decode"),
            event
        );
    }
}
