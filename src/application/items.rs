use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info, instrument};

use crate::application::pagination::{PagedResult, PagingParameters};
use crate::application::repos::{
    ItemsRepo, RepoError, UnitOfWork, UnitOfWorkError, UnitOfWorkFactory,
};
use crate::cache::{CacheKey, KeyPattern, ResponseCache};
use crate::domain::error::ValidationErrors;
use crate::domain::events::DomainEvent;
use crate::domain::items::{ItemDraft, ItemRecord};

const SOURCE: &str = "application::items";

#[derive(Debug, Error)]
pub enum ItemServiceError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("item {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<ValidationErrors> for ItemServiceError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl ItemServiceError {
    /// A row that vanished inside the transaction surfaces as `NotFound`.
    fn from_unit_of_work(id: i64, err: UnitOfWorkError) -> Self {
        match err {
            UnitOfWorkError::Repo(RepoError::NotFound) => Self::NotFound(id),
            other => Self::UnitOfWork(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateItemCommand {
    pub name: String,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct UpdateItemCommand {
    pub id: i64,
    pub name: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteItemCommand {
    pub id: i64,
}

/// Item reads and writes. Every write commits its outbox row in the same
/// transaction and invalidates cached list pages once the commit succeeded.
#[derive(Clone)]
pub struct ItemService {
    items: Arc<dyn ItemsRepo>,
    units: Arc<dyn UnitOfWorkFactory>,
    cache: ResponseCache,
}

impl ItemService {
    pub fn new(
        items: Arc<dyn ItemsRepo>,
        units: Arc<dyn UnitOfWorkFactory>,
        cache: ResponseCache,
    ) -> Self {
        Self {
            items,
            units,
            cache,
        }
    }

    pub async fn list_items(
        &self,
        paging: PagingParameters,
    ) -> Result<PagedResult<ItemRecord>, ItemServiceError> {
        let items = Arc::clone(&self.items);
        self.cache
            .get_or_populate(CacheKey::items_page(paging), move || async move {
                let (records, total) = items.list_items(paging).await?;
                Ok::<_, ItemServiceError>(PagedResult::new(records, total, paging))
            })
            .await
    }

    pub async fn get_item(&self, id: i64) -> Result<ItemRecord, ItemServiceError> {
        self.items
            .find_item(id)
            .await?
            .ok_or(ItemServiceError::NotFound(id))
    }

    #[instrument(skip(self, command), fields(name = %command.name))]
    pub async fn create_item(
        &self,
        command: CreateItemCommand,
    ) -> Result<ItemRecord, ItemServiceError> {
        let draft = ItemDraft::parse(&command.name, command.quantity)?;

        let mut uow = self.units.create();
        uow.begin().await?;
        let result = create_in_transaction(uow.as_mut(), &draft).await;
        let item = finish(uow.as_mut(), result).await?;

        self.cache.invalidate(KeyPattern::ItemPages).await;
        info!(target = SOURCE, item_id = item.id, "Item created");
        Ok(item)
    }

    #[instrument(skip(self, command), fields(item_id = command.id))]
    pub async fn update_item(&self, command: UpdateItemCommand) -> Result<(), ItemServiceError> {
        let draft = ItemDraft::parse(&command.name, command.quantity)?;
        self.get_item(command.id).await?;

        let mut uow = self.units.create();
        uow.begin().await?;
        let result = update_in_transaction(uow.as_mut(), command.id, draft).await;
        finish(uow.as_mut(), result).await?;

        self.cache.invalidate(KeyPattern::ItemPages).await;
        info!(target = SOURCE, item_id = command.id, "Item updated");
        Ok(())
    }

    #[instrument(skip(self, command), fields(item_id = command.id))]
    pub async fn delete_item(&self, command: DeleteItemCommand) -> Result<(), ItemServiceError> {
        self.get_item(command.id).await?;

        let mut uow = self.units.create();
        uow.begin().await?;
        let result = delete_in_transaction(uow.as_mut(), command.id).await;
        finish(uow.as_mut(), result).await?;

        self.cache.invalidate(KeyPattern::ItemPages).await;
        info!(target = SOURCE, item_id = command.id, "Item deleted");
        Ok(())
    }
}

async fn create_in_transaction(
    uow: &mut dyn UnitOfWork,
    draft: &ItemDraft,
) -> Result<ItemRecord, ItemServiceError> {
    let item = uow.insert_item(draft, OffsetDateTime::now_utc()).await?;
    uow.publish_domain_event(&DomainEvent::item_created(item.id, item.created_at))
        .await?;
    uow.commit().await?;
    Ok(item)
}

async fn update_in_transaction(
    uow: &mut dyn UnitOfWork,
    id: i64,
    draft: ItemDraft,
) -> Result<(), ItemServiceError> {
    let mut item = uow
        .find_item(id)
        .await?
        .ok_or(ItemServiceError::NotFound(id))?;
    let now = OffsetDateTime::now_utc();
    item.apply(draft, now);

    uow.update_item(&item)
        .await
        .map_err(|err| ItemServiceError::from_unit_of_work(id, err))?;
    uow.publish_domain_event(&DomainEvent::item_updated(id, now))
        .await?;
    uow.commit().await?;
    Ok(())
}

async fn delete_in_transaction(uow: &mut dyn UnitOfWork, id: i64) -> Result<(), ItemServiceError> {
    if uow.find_item(id).await?.is_none() {
        return Err(ItemServiceError::NotFound(id));
    }

    uow.delete_item(id)
        .await
        .map_err(|err| ItemServiceError::from_unit_of_work(id, err))?;
    uow.publish_domain_event(&DomainEvent::item_deleted(id, OffsetDateTime::now_utc()))
        .await?;
    uow.commit().await?;
    Ok(())
}

/// Rolls back after any failure past `begin`. A rollback error is logged and
/// the original error is returned.
async fn finish<T>(
    uow: &mut dyn UnitOfWork,
    result: Result<T, ItemServiceError>,
) -> Result<T, ItemServiceError> {
    if let Err(err) = &result
        && let Err(rollback_err) = uow.rollback().await
    {
        error!(
            target = SOURCE,
            error = %err,
            rollback_error = %rollback_err,
            "Rollback failed after an aborted item transaction"
        );
    }
    result
}
