//! Cache key definitions.
//!
//! Keys render to the colon-separated strings stored in the backend, so a
//! `KeyPattern` glob can find every entry derived from a resource.

use std::fmt;

use crate::application::pagination::PagingParameters;

use super::patterns::pattern_matches;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// One page of the item list.
    ItemsPage { page_number: u32, page_size: u32 },
}

impl CacheKey {
    pub fn items_page(paging: PagingParameters) -> Self {
        Self::ItemsPage {
            page_number: paging.page_number(),
            page_size: paging.page_size(),
        }
    }

    /// Low-cardinality label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ItemsPage { .. } => "items_page",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ItemsPage {
                page_number,
                page_size,
            } => write!(f, "items:page:{page_number}:size:{page_size}"),
        }
    }
}

/// Groups of keys removed together when the resource behind them changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    ItemPages,
}

impl KeyPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ItemPages => "items:page:*",
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        pattern_matches(self.as_str(), key)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
