//! Application services and the contracts they depend on.

pub mod error;
pub mod items;
pub mod outbox;
pub mod pagination;
pub mod repos;
