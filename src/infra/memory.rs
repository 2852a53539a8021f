//! In-process store implementing the same contracts as the Postgres adapter.
//!
//! Used when no database URL is configured and by tests. State lives behind a
//! single mutex, so a commit applies its staged writes and outbox rows in one
//! step and readers never observe half of a transaction.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::application::pagination::PagingParameters;
use crate::application::repos::{
    HealthRepo, ItemsRepo, OutboxRepo, RepoError, UnitOfWork, UnitOfWorkError, UnitOfWorkFactory,
};
use crate::cache::mutex_lock;
use crate::domain::events::DomainEvent;
use crate::domain::items::{ItemDraft, ItemRecord};
use crate::domain::outbox::{DeliveryOutcome, NewOutboxMessage, OutboxMessage, attempts_reached};

const SOURCE: &str = "infra::memory";

#[derive(Debug, Default)]
struct StoreState {
    items: BTreeMap<i64, ItemRecord>,
    last_item_id: i64,
    outbox: BTreeMap<i64, OutboxMessage>,
    last_outbox_id: i64,
}

impl StoreState {
    fn append_outbox(&mut self, message: NewOutboxMessage) -> i64 {
        self.last_outbox_id += 1;
        let id = self.last_outbox_id;
        self.outbox.insert(
            id,
            OutboxMessage {
                id,
                event_type: message.event_type.to_string(),
                content: message.content,
                created_at: message.created_at,
                processed_at: None,
                attempts: 0,
                last_error: None,
            },
        );
        id
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRepositories {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every outbox row ordered by id.
    pub fn outbox_messages(&self) -> Vec<OutboxMessage> {
        mutex_lock(&self.state, SOURCE, "outbox_messages")
            .outbox
            .values()
            .cloned()
            .collect()
    }

    pub fn items(&self) -> Vec<ItemRecord> {
        mutex_lock(&self.state, SOURCE, "items")
            .items
            .values()
            .cloned()
            .collect()
    }

    /// Appends an already-committed outbox row, bypassing any unit of work.
    pub fn enqueue_outbox(&self, message: NewOutboxMessage) -> i64 {
        mutex_lock(&self.state, SOURCE, "enqueue_outbox").append_outbox(message)
    }
}

#[async_trait]
impl HealthRepo for InMemoryRepositories {
    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

#[async_trait]
impl ItemsRepo for InMemoryRepositories {
    async fn list_items(
        &self,
        paging: PagingParameters,
    ) -> Result<(Vec<ItemRecord>, i64), RepoError> {
        let state = mutex_lock(&self.state, SOURCE, "list_items");
        let total = state.items.len() as i64;
        let page = state
            .items
            .values()
            .skip(paging.offset() as usize)
            .take(paging.limit() as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn find_item(&self, id: i64) -> Result<Option<ItemRecord>, RepoError> {
        Ok(mutex_lock(&self.state, SOURCE, "find_item")
            .items
            .get(&id)
            .cloned())
    }
}

#[async_trait]
impl OutboxRepo for InMemoryRepositories {
    async fn fetch_pending(
        &self,
        limit: u32,
        max_attempts: Option<NonZeroU32>,
    ) -> Result<Vec<OutboxMessage>, RepoError> {
        let state = mutex_lock(&self.state, SOURCE, "fetch_pending");
        let mut pending: Vec<OutboxMessage> = state
            .outbox
            .values()
            .filter(|message| message.is_pending())
            .filter(|message| match max_attempts {
                Some(max) => !attempts_reached(message.attempts, max),
                None => true,
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn record_outcomes(&self, outcomes: &[DeliveryOutcome]) -> Result<(), RepoError> {
        let mut state = mutex_lock(&self.state, SOURCE, "record_outcomes");
        for outcome in outcomes {
            let Some(message) = state.outbox.get_mut(&outcome.id()) else {
                continue;
            };
            if !message.is_pending() {
                continue;
            }
            match outcome {
                DeliveryOutcome::Delivered { at, .. } => message.processed_at = Some(*at),
                DeliveryOutcome::Failed { error, .. } => {
                    message.attempts += 1;
                    message.last_error = Some(error.clone());
                }
            }
        }
        Ok(())
    }

    async fn purge_processed(&self, before: OffsetDateTime) -> Result<u64, RepoError> {
        let mut state = mutex_lock(&self.state, SOURCE, "purge_processed");
        let before_len = state.outbox.len();
        state
            .outbox
            .retain(|_, message| !matches!(message.processed_at, Some(at) if at < before));
        Ok((before_len - state.outbox.len()) as u64)
    }

    async fn count_pending(&self) -> Result<i64, RepoError> {
        let state = mutex_lock(&self.state, SOURCE, "count_pending");
        Ok(state.outbox.values().filter(|m| m.is_pending()).count() as i64)
    }
}

impl UnitOfWorkFactory for InMemoryRepositories {
    fn create(&self) -> Box<dyn UnitOfWork> {
        Box::new(InMemoryUnitOfWork {
            state: Arc::clone(&self.state),
            tx: None,
        })
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Insert(ItemRecord),
    Update(ItemRecord),
    Delete(i64),
}

impl StagedWrite {
    fn id(&self) -> i64 {
        match self {
            Self::Insert(item) | Self::Update(item) => item.id,
            Self::Delete(id) => *id,
        }
    }
}

#[derive(Debug, Default)]
struct StagedTransaction {
    writes: Vec<StagedWrite>,
    outbox: Vec<NewOutboxMessage>,
}

/// Stages writes and replays them against the shared state on commit.
///
/// A staged update or delete whose row disappeared since it was staged makes
/// the commit fail as a conflict; the transaction then stays open.
pub struct InMemoryUnitOfWork {
    state: Arc<Mutex<StoreState>>,
    tx: Option<StagedTransaction>,
}

impl InMemoryUnitOfWork {
    fn staged(&mut self) -> Result<&mut StagedTransaction, UnitOfWorkError> {
        self.tx.as_mut().ok_or(UnitOfWorkError::NotActive)
    }

    /// Committed row with this transaction's own writes layered on top.
    fn visible_item(&self, id: i64) -> Result<Option<ItemRecord>, UnitOfWorkError> {
        let staged = self.tx.as_ref().ok_or(UnitOfWorkError::NotActive)?;
        let mut item = mutex_lock(&self.state, SOURCE, "visible_item")
            .items
            .get(&id)
            .cloned();
        for write in staged.writes.iter().filter(|write| write.id() == id) {
            item = match write {
                StagedWrite::Insert(record) | StagedWrite::Update(record) => Some(record.clone()),
                StagedWrite::Delete(_) => None,
            };
        }
        Ok(item)
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn begin(&mut self) -> Result<(), UnitOfWorkError> {
        if self.tx.is_some() {
            return Err(UnitOfWorkError::AlreadyActive);
        }
        self.tx = Some(StagedTransaction::default());
        Ok(())
    }

    async fn find_item(&mut self, id: i64) -> Result<Option<ItemRecord>, UnitOfWorkError> {
        self.visible_item(id)
    }

    async fn insert_item(
        &mut self,
        draft: &ItemDraft,
        created_at: OffsetDateTime,
    ) -> Result<ItemRecord, UnitOfWorkError> {
        if self.tx.is_none() {
            return Err(UnitOfWorkError::NotActive);
        }
        // Ids behave like a sequence: reserved now, never reused after a rollback.
        let id = {
            let mut state = mutex_lock(&self.state, SOURCE, "insert_item");
            state.last_item_id += 1;
            state.last_item_id
        };
        let record = ItemRecord {
            id,
            name: draft.name.clone(),
            quantity: draft.quantity,
            created_at,
            updated_at: None,
        };
        self.staged()?.writes.push(StagedWrite::Insert(record.clone()));
        Ok(record)
    }

    async fn update_item(&mut self, item: &ItemRecord) -> Result<(), UnitOfWorkError> {
        if self.visible_item(item.id)?.is_none() {
            return Err(RepoError::NotFound.into());
        }
        self.staged()?.writes.push(StagedWrite::Update(item.clone()));
        Ok(())
    }

    async fn delete_item(&mut self, id: i64) -> Result<(), UnitOfWorkError> {
        if self.visible_item(id)?.is_none() {
            return Err(RepoError::NotFound.into());
        }
        self.staged()?.writes.push(StagedWrite::Delete(id));
        Ok(())
    }

    async fn publish_domain_event(&mut self, event: &DomainEvent) -> Result<(), UnitOfWorkError> {
        let staged = self.staged()?;
        let message = NewOutboxMessage::from_event(event, OffsetDateTime::now_utc())?;
        staged.outbox.push(message);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), UnitOfWorkError> {
        let staged = self.tx.as_ref().ok_or(UnitOfWorkError::NotActive)?;
        let mut state = mutex_lock(&self.state, SOURCE, "commit");

        let mut items = state.items.clone();
        for write in &staged.writes {
            match write {
                StagedWrite::Insert(record) => {
                    items.insert(record.id, record.clone());
                }
                StagedWrite::Update(record) => match items.get_mut(&record.id) {
                    Some(existing) => *existing = record.clone(),
                    None => {
                        return Err(UnitOfWorkError::transaction(format!(
                            "conflict: item {} was removed by a concurrent transaction",
                            record.id
                        )));
                    }
                },
                StagedWrite::Delete(id) => {
                    if items.remove(id).is_none() {
                        return Err(UnitOfWorkError::transaction(format!(
                            "conflict: item {id} was removed by a concurrent transaction"
                        )));
                    }
                }
            }
        }

        state.items = items;
        for message in staged.outbox.iter().cloned() {
            state.append_outbox(message);
        }
        drop(state);

        self.tx = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), UnitOfWorkError> {
        self.tx = None;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.tx.is_some()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn draft(name: &str, quantity: i32) -> ItemDraft {
        ItemDraft::parse(name, quantity).expect("valid draft")
    }

    async fn create(repos: &InMemoryRepositories, name: &str) -> ItemRecord {
        let mut uow = repos.create();
        uow.begin().await.expect("begin");
        let item = uow
            .insert_item(&draft(name, 1), OffsetDateTime::now_utc())
            .await
            .expect("insert");
        uow.publish_domain_event(&DomainEvent::item_created(item.id, item.created_at))
            .await
            .expect("publish");
        uow.commit().await.expect("commit");
        item
    }

    #[tokio::test]
    async fn commit_makes_item_and_outbox_row_visible_together() {
        let repos = InMemoryRepositories::new();
        let mut uow = repos.create();
        uow.begin().await.expect("begin");
        let item = uow
            .insert_item(&draft("Widget", 3), OffsetDateTime::now_utc())
            .await
            .expect("insert");
        uow.publish_domain_event(&DomainEvent::item_created(item.id, item.created_at))
            .await
            .expect("publish");

        assert!(repos.items().is_empty());
        assert!(repos.outbox_messages().is_empty());

        uow.commit().await.expect("commit");

        assert_eq!(repos.items(), vec![item]);
        let outbox = repos.outbox_messages();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "ItemCreatedV1");
        assert!(outbox[0].is_pending());
    }

    #[tokio::test]
    async fn rollback_discards_staged_writes() {
        let repos = InMemoryRepositories::new();
        let mut uow = repos.create();
        uow.begin().await.expect("begin");
        let item = uow
            .insert_item(&draft("Widget", 3), OffsetDateTime::now_utc())
            .await
            .expect("insert");
        uow.publish_domain_event(&DomainEvent::item_created(item.id, item.created_at))
            .await
            .expect("publish");

        uow.rollback().await.expect("rollback");

        assert!(!uow.is_active());
        assert!(repos.items().is_empty());
        assert!(repos.outbox_messages().is_empty());
        uow.rollback().await.expect("second rollback is a no-op");
    }

    #[tokio::test]
    async fn begin_twice_is_rejected() {
        let repos = InMemoryRepositories::new();
        let mut uow = repos.create();
        uow.begin().await.expect("begin");
        assert!(matches!(
            uow.begin().await,
            Err(UnitOfWorkError::AlreadyActive)
        ));
    }

    #[tokio::test]
    async fn writes_outside_a_transaction_are_rejected() {
        let repos = InMemoryRepositories::new();
        let mut uow = repos.create();
        let event = DomainEvent::item_deleted(1, OffsetDateTime::now_utc());
        assert!(matches!(
            uow.publish_domain_event(&event).await,
            Err(UnitOfWorkError::NotActive)
        ));
        assert!(matches!(uow.commit().await, Err(UnitOfWorkError::NotActive)));
    }

    #[tokio::test]
    async fn transaction_sees_its_own_writes() {
        let repos = InMemoryRepositories::new();
        let existing = create(&repos, "Bolt").await;

        let mut uow = repos.create();
        uow.begin().await.expect("begin");
        uow.delete_item(existing.id).await.expect("delete");

        assert!(uow.find_item(existing.id).await.expect("find").is_none());
        assert!(repos.find_item(existing.id).await.expect("find").is_some());
        assert!(matches!(
            uow.delete_item(existing.id).await,
            Err(UnitOfWorkError::Repo(RepoError::NotFound))
        ));
    }

    #[tokio::test]
    async fn conflicting_commit_leaves_transaction_open() {
        let repos = InMemoryRepositories::new();
        let existing = create(&repos, "Nut").await;

        let mut first = repos.create();
        first.begin().await.expect("begin first");
        let mut updated = existing.clone();
        updated.apply(draft("Nut v2", 4), OffsetDateTime::now_utc());
        first.update_item(&updated).await.expect("stage update");

        let mut second = repos.create();
        second.begin().await.expect("begin second");
        second.delete_item(existing.id).await.expect("stage delete");
        second.commit().await.expect("commit delete");

        let err = first.commit().await.expect_err("conflict");
        assert!(matches!(err, UnitOfWorkError::Transaction(_)));
        assert!(first.is_active());
        first.rollback().await.expect("rollback after failed commit");
        assert!(repos.items().is_empty());
    }

    #[tokio::test]
    async fn list_items_pages_by_id() {
        let repos = InMemoryRepositories::new();
        for name in ["a", "b", "c"] {
            create(&repos, name).await;
        }

        let (page, total) = repos
            .list_items(PagingParameters::new(Some(2), Some(2)))
            .await
            .expect("list");
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "c");
    }

    #[tokio::test]
    async fn outbox_fetch_orders_by_creation_and_skips_exhausted_rows() {
        let repos = InMemoryRepositories::new();
        let newer = DomainEvent::item_created(2, datetime!(2024-01-02 00:00 UTC));
        let older = DomainEvent::item_created(1, datetime!(2024-01-01 00:00 UTC));
        let newer_id = repos.enqueue_outbox(
            NewOutboxMessage::from_event(&newer, datetime!(2024-01-02 00:00 UTC)).expect("row"),
        );
        let older_id = repos.enqueue_outbox(
            NewOutboxMessage::from_event(&older, datetime!(2024-01-01 00:00 UTC)).expect("row"),
        );

        let pending = repos.fetch_pending(10, None).await.expect("fetch");
        let ids: Vec<i64> = pending.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![older_id, newer_id]);

        repos
            .record_outcomes(&[DeliveryOutcome::Failed {
                id: older_id,
                error: "broker down".into(),
            }])
            .await
            .expect("record");

        let capped = repos
            .fetch_pending(10, NonZeroU32::new(1))
            .await
            .expect("fetch capped");
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].id, newer_id);
        assert_eq!(repos.count_pending().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn purge_removes_only_old_processed_rows() {
        let repos = InMemoryRepositories::new();
        let event = DomainEvent::item_created(1, datetime!(2024-01-01 00:00 UTC));
        let old = repos.enqueue_outbox(
            NewOutboxMessage::from_event(&event, datetime!(2024-01-01 00:00 UTC)).expect("row"),
        );
        let recent = repos.enqueue_outbox(
            NewOutboxMessage::from_event(&event, datetime!(2024-01-01 00:00 UTC)).expect("row"),
        );
        repos.enqueue_outbox(
            NewOutboxMessage::from_event(&event, datetime!(2024-01-01 00:00 UTC)).expect("row"),
        );
        repos
            .record_outcomes(&[
                DeliveryOutcome::Delivered {
                    id: old,
                    at: datetime!(2024-01-01 00:00 UTC),
                },
                DeliveryOutcome::Delivered {
                    id: recent,
                    at: datetime!(2024-02-01 00:00 UTC),
                },
            ])
            .await
            .expect("record");

        let purged = repos
            .purge_processed(datetime!(2024-01-15 00:00 UTC))
            .await
            .expect("purge");

        assert_eq!(purged, 1);
        assert_eq!(repos.outbox_messages().len(), 2);
    }
}
