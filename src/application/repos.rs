//! Repository traits describing persistence adapters.

use std::num::NonZeroU32;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::pagination::PagingParameters;
use crate::domain::events::{DomainEvent, EventCodecError};
use crate::domain::items::{ItemDraft, ItemRecord};
use crate::domain::outbox::{DeliveryOutcome, OutboxMessage};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait HealthRepo: Send + Sync {
    async fn ping(&self) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ItemsRepo: Send + Sync {
    /// Returns one page ordered by id plus the total row count.
    async fn list_items(
        &self,
        paging: PagingParameters,
    ) -> Result<(Vec<ItemRecord>, i64), RepoError>;

    async fn find_item(&self, id: i64) -> Result<Option<ItemRecord>, RepoError>;
}

#[async_trait]
pub trait OutboxRepo: Send + Sync {
    /// Pending rows oldest first. With a cap, rows that used up their attempts are skipped.
    async fn fetch_pending(
        &self,
        limit: u32,
        max_attempts: Option<NonZeroU32>,
    ) -> Result<Vec<OutboxMessage>, RepoError>;

    /// Persists every outcome of one cycle in a single transaction.
    async fn record_outcomes(&self, outcomes: &[DeliveryOutcome]) -> Result<(), RepoError>;

    /// Deletes delivered rows processed before `before`. Pending rows are never purged.
    async fn purge_processed(&self, before: OffsetDateTime) -> Result<u64, RepoError>;

    async fn count_pending(&self) -> Result<i64, RepoError>;
}

#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    #[error("a transaction is already active")]
    AlreadyActive,
    #[error("no active transaction")]
    NotActive,
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("failed to serialize domain event: {0}")]
    Serialization(#[from] EventCodecError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl UnitOfWorkError {
    pub fn transaction(err: impl std::fmt::Display) -> Self {
        Self::Transaction(err.to_string())
    }
}

/// One business transaction spanning entity writes and their outbox rows.
///
/// Callers pair every successful `begin` with exactly one of `commit` or
/// `rollback`. A failed `commit` does not roll back on its own; `rollback`
/// is safe to call afterwards and succeeds when nothing is left to discard.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn begin(&mut self) -> Result<(), UnitOfWorkError>;

    async fn find_item(&mut self, id: i64) -> Result<Option<ItemRecord>, UnitOfWorkError>;

    async fn insert_item(
        &mut self,
        draft: &ItemDraft,
        created_at: OffsetDateTime,
    ) -> Result<ItemRecord, UnitOfWorkError>;

    /// Fails with `RepoError::NotFound` when the row no longer exists.
    async fn update_item(&mut self, item: &ItemRecord) -> Result<(), UnitOfWorkError>;

    /// Fails with `RepoError::NotFound` when the row no longer exists.
    async fn delete_item(&mut self, id: i64) -> Result<(), UnitOfWorkError>;

    /// Encodes the event and stages an outbox row; nothing is written until `commit`.
    async fn publish_domain_event(&mut self, event: &DomainEvent) -> Result<(), UnitOfWorkError>;

    async fn commit(&mut self) -> Result<(), UnitOfWorkError>;

    async fn rollback(&mut self) -> Result<(), UnitOfWorkError>;

    fn is_active(&self) -> bool;
}

pub trait UnitOfWorkFactory: Send + Sync {
    fn create(&self) -> Box<dyn UnitOfWork>;
}
