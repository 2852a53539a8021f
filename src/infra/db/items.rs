use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::pagination::PagingParameters,
    application::repos::{ItemsRepo, RepoError},
    domain::items::ItemRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

pub(super) const ITEM_COLUMNS: &str = "id, name, quantity, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(super) struct ItemRow {
    id: i64,
    name: String,
    quantity: i32,
    created_at: OffsetDateTime,
    updated_at: Option<OffsetDateTime>,
}

impl From<ItemRow> for ItemRecord {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            quantity: row.quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl ItemsRepo for PostgresRepositories {
    async fn list_items(
        &self,
        paging: PagingParameters,
    ) -> Result<(Vec<ItemRecord>, i64), RepoError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok((rows.into_iter().map(ItemRecord::from).collect(), total))
    }

    async fn find_item(&self, id: i64) -> Result<Option<ItemRecord>, RepoError> {
        let row: Option<ItemRow> =
            sqlx::query_as(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        Ok(row.map(ItemRecord::from))
    }
}
