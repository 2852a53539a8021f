use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::debug;

use crate::{
    application::repos::{RepoError, UnitOfWork, UnitOfWorkError, UnitOfWorkFactory},
    domain::{
        events::DomainEvent,
        items::{ItemDraft, ItemRecord},
        outbox::NewOutboxMessage,
    },
};

use super::{PostgresRepositories, items::ItemRow, map_sqlx_error};

const SOURCE: &str = "infra::db::unit_of_work";

/// A database transaction plus the outbox rows staged for it.
///
/// Staged rows are inserted right before `COMMIT`, so they share the
/// transaction with the entity writes. Dropping an active unit of work rolls
/// the transaction back.
pub struct PostgresUnitOfWork {
    pool: Arc<PgPool>,
    tx: Option<Transaction<'static, Postgres>>,
    pending: Vec<NewOutboxMessage>,
}

impl PostgresUnitOfWork {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            tx: None,
            pending: Vec::new(),
        }
    }

    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, UnitOfWorkError> {
        self.tx.as_mut().ok_or(UnitOfWorkError::NotActive)
    }
}

impl UnitOfWorkFactory for PostgresRepositories {
    fn create(&self) -> Box<dyn UnitOfWork> {
        Box::new(PostgresUnitOfWork::new(self.pool.clone()))
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn begin(&mut self) -> Result<(), UnitOfWorkError> {
        if self.tx.is_some() {
            return Err(UnitOfWorkError::AlreadyActive);
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(UnitOfWorkError::transaction)?;
        self.tx = Some(tx);
        self.pending.clear();
        Ok(())
    }

    async fn find_item(&mut self, id: i64) -> Result<Option<ItemRecord>, UnitOfWorkError> {
        let tx = self.tx()?;
        let row: Option<ItemRow> = sqlx::query_as(
            "SELECT id, name, quantity, created_at, updated_at FROM items WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ItemRecord::from))
    }

    async fn insert_item(
        &mut self,
        draft: &ItemDraft,
        created_at: OffsetDateTime,
    ) -> Result<ItemRecord, UnitOfWorkError> {
        let tx = self.tx()?;
        let row: ItemRow = sqlx::query_as(
            r#"
            INSERT INTO items (name, quantity, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, name, quantity, created_at, updated_at
            "#,
        )
        .bind(&draft.name)
        .bind(draft.quantity)
        .bind(created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update_item(&mut self, item: &ItemRecord) -> Result<(), UnitOfWorkError> {
        let tx = self.tx()?;
        let result =
            sqlx::query("UPDATE items SET name = $2, quantity = $3, updated_at = $4 WHERE id = $1")
                .bind(item.id)
                .bind(&item.name)
                .bind(item.quantity)
                .bind(item.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound.into());
        }
        Ok(())
    }

    async fn delete_item(&mut self, id: i64) -> Result<(), UnitOfWorkError> {
        let tx = self.tx()?;
        let result = sqlx::query("DELETE FROM items WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound.into());
        }
        Ok(())
    }

    async fn publish_domain_event(&mut self, event: &DomainEvent) -> Result<(), UnitOfWorkError> {
        if self.tx.is_none() {
            return Err(UnitOfWorkError::NotActive);
        }
        let message = NewOutboxMessage::from_event(event, OffsetDateTime::now_utc())?;
        self.pending.push(message);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), UnitOfWorkError> {
        let Some(tx) = self.tx.as_mut() else {
            return Err(UnitOfWorkError::NotActive);
        };

        // A failed flush keeps the transaction open for the caller's rollback.
        if !self.pending.is_empty() {
            let types: Vec<&str> = self.pending.iter().map(|m| m.event_type).collect();
            let contents: Vec<&str> = self.pending.iter().map(|m| m.content.as_str()).collect();
            let created: Vec<OffsetDateTime> = self.pending.iter().map(|m| m.created_at).collect();

            sqlx::query(
                r#"
                INSERT INTO outbox_messages (event_type, content, created_at)
                SELECT * FROM UNNEST($1::TEXT[], $2::TEXT[], $3::TIMESTAMPTZ[])
                "#,
            )
            .bind(&types)
            .bind(&contents)
            .bind(&created)
            .execute(&mut **tx)
            .await
            .map_err(UnitOfWorkError::transaction)?;
        }

        let staged = self.pending.len();
        let Some(tx) = self.tx.take() else {
            return Err(UnitOfWorkError::NotActive);
        };
        self.pending.clear();
        tx.commit().await.map_err(UnitOfWorkError::transaction)?;

        debug!(target = SOURCE, outbox_rows = staged, "Committed unit of work");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), UnitOfWorkError> {
        self.pending.clear();
        match self.tx.take() {
            Some(tx) => tx.rollback().await.map_err(UnitOfWorkError::transaction),
            None => Ok(()),
        }
    }

    fn is_active(&self) -> bool {
        self.tx.is_some()
    }
}
