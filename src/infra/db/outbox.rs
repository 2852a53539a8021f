use std::num::NonZeroU32;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{OutboxRepo, RepoError},
    domain::outbox::{DeliveryOutcome, OutboxMessage},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    event_type: String,
    content: String,
    created_at: OffsetDateTime,
    processed_at: Option<OffsetDateTime>,
    attempts: i32,
    last_error: Option<String>,
}

impl From<OutboxRow> for OutboxMessage {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            event_type: row.event_type,
            content: row.content,
            created_at: row.created_at,
            processed_at: row.processed_at,
            attempts: row.attempts,
            last_error: row.last_error,
        }
    }
}

#[async_trait]
impl OutboxRepo for PostgresRepositories {
    async fn fetch_pending(
        &self,
        limit: u32,
        max_attempts: Option<NonZeroU32>,
    ) -> Result<Vec<OutboxMessage>, RepoError> {
        let cap = max_attempts.map(|max| i64::from(max.get()));

        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, event_type, content, created_at, processed_at, attempts, last_error
            FROM outbox_messages
            WHERE processed_at IS NULL
              AND ($2::BIGINT IS NULL OR attempts < $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .bind(cap)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(OutboxMessage::from).collect())
    }

    async fn record_outcomes(&self, outcomes: &[DeliveryOutcome]) -> Result<(), RepoError> {
        if outcomes.is_empty() {
            return Ok(());
        }

        let mut delivered_ids = Vec::new();
        let mut delivered_at = Vec::new();
        let mut failed_ids = Vec::new();
        let mut failed_errors = Vec::new();
        for outcome in outcomes {
            match outcome {
                DeliveryOutcome::Delivered { id, at } => {
                    delivered_ids.push(*id);
                    delivered_at.push(*at);
                }
                DeliveryOutcome::Failed { id, error } => {
                    failed_ids.push(*id);
                    failed_errors.push(error.clone());
                }
            }
        }

        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        if !delivered_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE outbox_messages AS o
                SET processed_at = d.processed_at
                FROM UNNEST($1::BIGINT[], $2::TIMESTAMPTZ[]) AS d(id, processed_at)
                WHERE o.id = d.id AND o.processed_at IS NULL
                "#,
            )
            .bind(&delivered_ids)
            .bind(&delivered_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        if !failed_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE outbox_messages AS o
                SET attempts = o.attempts + 1, last_error = f.error
                FROM UNNEST($1::BIGINT[], $2::TEXT[]) AS f(id, error)
                WHERE o.id = f.id AND o.processed_at IS NULL
                "#,
            )
            .bind(&failed_ids)
            .bind(&failed_errors)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn purge_processed(&self, before: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query(
            "DELETE FROM outbox_messages WHERE processed_at IS NOT NULL AND processed_at < $1",
        )
        .bind(before)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn count_pending(&self) -> Result<i64, RepoError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE processed_at IS NULL")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }
}
