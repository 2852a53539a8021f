use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::items::ItemRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDto {
    pub id: i64,
    pub name: String,
    pub quantity: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl From<ItemRecord> for ItemDto {
    fn from(record: ItemRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            quantity: record.quantity,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Missing fields are left to item validation so clients get field-level errors.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemWriteRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: i32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemListQuery {
    pub page_number: Option<i64>,
    pub page_size: Option<i64>,
}
