//! The item resource and its field rules.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::error::ValidationErrors;

pub const NAME_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: i64,
    pub name: String,
    pub quantity: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// Client-supplied item fields that have passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDraft {
    pub name: String,
    pub quantity: i32,
}

impl ItemDraft {
    /// Validates raw input, trimming the name. Every failing field is reported.
    pub fn parse(name: &str, quantity: i32) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = name.trim();

        if name.is_empty() {
            errors.add("name", "Name is required.");
        } else if name.chars().count() > NAME_MAX_CHARS {
            errors.add("name", "Name must not exceed 100 characters.");
        }

        if quantity < 0 {
            errors.add("quantity", "Quantity must be a non-negative integer.");
        }

        errors.into_result()?;

        Ok(Self {
            name: name.to_string(),
            quantity,
        })
    }
}

impl ItemRecord {
    /// Applies an accepted draft, stamping the modification time.
    pub fn apply(&mut self, draft: ItemDraft, now: OffsetDateTime) {
        self.name = draft.name;
        self.quantity = draft.quantity;
        self.updated_at = Some(now);
    }
}
