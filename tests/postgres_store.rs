//! Postgres adapter checks. Run with `DATABASE_URL` set and `--ignored`.

use std::num::NonZeroU32;
use std::sync::Arc;

use sqlx::PgPool;
use time::OffsetDateTime;

use itemsvc::application::items::{
    CreateItemCommand, DeleteItemCommand, ItemService, ItemServiceError, UpdateItemCommand,
};
use itemsvc::application::pagination::PagingParameters;
use itemsvc::application::repos::{ItemsRepo, OutboxRepo, UnitOfWorkFactory};
use itemsvc::cache::ResponseCache;
use itemsvc::domain::events::DomainEvent;
use itemsvc::domain::items::ItemDraft;
use itemsvc::domain::outbox::DeliveryOutcome;
use itemsvc::infra::db::PostgresRepositories;

fn service(repos: &Arc<PostgresRepositories>) -> ItemService {
    ItemService::new(repos.clone(), repos.clone(), ResponseCache::disabled())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn writes_and_outbox_rows_commit_together(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let service = service(&repos);

    let item = service
        .create_item(CreateItemCommand {
            name: "Widget".into(),
            quantity: 3,
        })
        .await
        .expect("create");
    service
        .update_item(UpdateItemCommand {
            id: item.id,
            name: "Widget v2".into(),
            quantity: 4,
        })
        .await
        .expect("update");

    let (page, total) = repos
        .list_items(PagingParameters::default())
        .await
        .expect("list");
    assert_eq!(total, 1);
    assert_eq!(page[0].name, "Widget v2");
    assert!(page[0].updated_at.is_some());

    let pending = repos.fetch_pending(10, None).await.expect("fetch");
    let tags: Vec<&str> = pending.iter().map(|m| m.event_type.as_str()).collect();
    assert_eq!(
        tags,
        [DomainEvent::ITEM_CREATED_V1, DomainEvent::ITEM_UPDATED_V1]
    );
    assert_eq!(repos.count_pending().await.expect("count"), 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn rollback_discards_item_and_event(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));

    let mut uow = repos.create();
    uow.begin().await.expect("begin");
    let draft = ItemDraft::parse("Ghost", 1).expect("draft");
    let item = uow
        .insert_item(&draft, OffsetDateTime::now_utc())
        .await
        .expect("insert");
    uow.publish_domain_event(&DomainEvent::item_created(item.id, item.created_at))
        .await
        .expect("stage event");
    uow.rollback().await.expect("rollback");
    assert!(!uow.is_active());

    assert!(repos.find_item(item.id).await.expect("find").is_none());
    assert_eq!(repos.count_pending().await.expect("count"), 0);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn missing_item_maps_to_not_found(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let service = service(&repos);

    let err = service
        .delete_item(DeleteItemCommand { id: 4242 })
        .await
        .expect_err("missing");
    assert!(matches!(err, ItemServiceError::NotFound(4242)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn outcomes_mark_rows_and_cap_excludes_exhausted(pool: PgPool) {
    let repos = Arc::new(PostgresRepositories::new(pool));
    let service = service(&repos);
    for name in ["a", "b"] {
        service
            .create_item(CreateItemCommand {
                name: name.into(),
                quantity: 1,
            })
            .await
            .expect("create");
    }

    let pending = repos.fetch_pending(10, None).await.expect("fetch");
    assert_eq!(pending.len(), 2);
    let delivered_at = OffsetDateTime::now_utc();
    repos
        .record_outcomes(&[
            DeliveryOutcome::Delivered {
                id: pending[0].id,
                at: delivered_at,
            },
            DeliveryOutcome::Failed {
                id: pending[1].id,
                error: "broker offline".into(),
            },
        ])
        .await
        .expect("record");

    let remaining = repos.fetch_pending(10, None).await.expect("refetch");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].attempts, 1);
    assert_eq!(remaining[0].last_error.as_deref(), Some("broker offline"));

    let capped = repos
        .fetch_pending(10, NonZeroU32::new(1))
        .await
        .expect("capped fetch");
    assert!(capped.is_empty());

    let purged = repos
        .purge_processed(delivered_at + time::Duration::seconds(1))
        .await
        .expect("purge");
    assert_eq!(purged, 1);
    assert_eq!(repos.count_pending().await.expect("count"), 1);
}
