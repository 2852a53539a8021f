//! Domain events carried through the outbox.
//!
//! Every kind has a stable type tag and a JSON payload. The tag is stored next
//! to the payload so a row can be decoded without guessing its shape.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ItemCreatedV1 {
    pub item_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ItemUpdatedV1 {
    pub item_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ItemDeletedV1 {
    pub item_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub deleted_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    ItemCreatedV1(ItemCreatedV1),
    ItemUpdatedV1(ItemUpdatedV1),
    ItemDeletedV1(ItemDeletedV1),
}

#[derive(Debug, Error)]
pub enum EventCodecError {
    #[error("unknown event type `{0}`")]
    UnknownType(String),
    #[error("failed to encode `{event_type}` payload: {source}")]
    Encode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode `{event_type}` payload: {source}")]
    Decode {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl DomainEvent {
    pub const ITEM_CREATED_V1: &'static str = "ItemCreatedV1";
    pub const ITEM_UPDATED_V1: &'static str = "ItemUpdatedV1";
    pub const ITEM_DELETED_V1: &'static str = "ItemDeletedV1";

    pub fn item_created(item_id: i64, created_at: OffsetDateTime) -> Self {
        Self::ItemCreatedV1(ItemCreatedV1 {
            item_id,
            created_at,
        })
    }

    pub fn item_updated(item_id: i64, updated_at: OffsetDateTime) -> Self {
        Self::ItemUpdatedV1(ItemUpdatedV1 {
            item_id,
            updated_at,
        })
    }

    pub fn item_deleted(item_id: i64, deleted_at: OffsetDateTime) -> Self {
        Self::ItemDeletedV1(ItemDeletedV1 {
            item_id,
            deleted_at,
        })
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::ItemCreatedV1(_) => Self::ITEM_CREATED_V1,
            Self::ItemUpdatedV1(_) => Self::ITEM_UPDATED_V1,
            Self::ItemDeletedV1(_) => Self::ITEM_DELETED_V1,
        }
    }

    pub fn item_id(&self) -> i64 {
        match self {
            Self::ItemCreatedV1(event) => event.item_id,
            Self::ItemUpdatedV1(event) => event.item_id,
            Self::ItemDeletedV1(event) => event.item_id,
        }
    }

    /// Serializes the payload only; the tag travels separately.
    pub fn encode(&self) -> Result<String, EventCodecError> {
        let result = match self {
            Self::ItemCreatedV1(event) => serde_json::to_string(event),
            Self::ItemUpdatedV1(event) => serde_json::to_string(event),
            Self::ItemDeletedV1(event) => serde_json::to_string(event),
        };
        result.map_err(|source| EventCodecError::Encode {
            event_type: self.type_tag(),
            source,
        })
    }

    pub fn decode(type_tag: &str, content: &str) -> Result<Self, EventCodecError> {
        match type_tag {
            Self::ITEM_CREATED_V1 => {
                decode_payload(Self::ITEM_CREATED_V1, content).map(Self::ItemCreatedV1)
            }
            Self::ITEM_UPDATED_V1 => {
                decode_payload(Self::ITEM_UPDATED_V1, content).map(Self::ItemUpdatedV1)
            }
            Self::ITEM_DELETED_V1 => {
                decode_payload(Self::ITEM_DELETED_V1, content).map(Self::ItemDeletedV1)
            }
            other => Err(EventCodecError::UnknownType(other.to_string())),
        }
    }
}

fn decode_payload<T: DeserializeOwned>(
    event_type: &'static str,
    content: &str,
) -> Result<T, EventCodecError> {
    serde_json::from_str(content).map_err(|source| EventCodecError::Decode { event_type, source })
}
