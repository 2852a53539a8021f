//! Cached list pages must never outlive a committed write.
//!
//! Every request goes through the full router; a counting store wrapper shows
//! whether a list read was served from the cache or from the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use itemsvc::application::items::ItemService;
use itemsvc::application::pagination::PagingParameters;
use itemsvc::application::repos::{ItemsRepo, RepoError};
use itemsvc::cache::{CacheConfig, MemoryCache, ResponseCache};
use itemsvc::domain::items::ItemRecord;
use itemsvc::infra::http::{ApiState, build_router};
use itemsvc::infra::memory::InMemoryRepositories;

struct CountingStore {
    inner: InMemoryRepositories,
    list_calls: AtomicUsize,
}

impl CountingStore {
    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemsRepo for CountingStore {
    async fn list_items(
        &self,
        paging: PagingParameters,
    ) -> Result<(Vec<ItemRecord>, i64), RepoError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_items(paging).await
    }

    async fn find_item(&self, id: i64) -> Result<Option<ItemRecord>, RepoError> {
        self.inner.find_item(id).await
    }
}

fn setup(cache: ResponseCache) -> (Router, Arc<CountingStore>) {
    let repos = InMemoryRepositories::new();
    let store = Arc::new(CountingStore {
        inner: repos.clone(),
        list_calls: AtomicUsize::new(0),
    });
    let items = ItemService::new(store.clone(), Arc::new(repos.clone()), cache);
    let router = build_router(ApiState {
        items: Arc::new(items),
        health: Arc::new(repos),
    });
    (router, store)
}

fn memory_cache() -> ResponseCache {
    let config = CacheConfig::default();
    ResponseCache::new(Arc::new(MemoryCache::new(&config)), config.ttl())
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}

async fn create(app: &Router, name: &str) -> i64 {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/items",
        Some(json!({ "name": name, "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_i64().expect("id")
}

#[tokio::test]
async fn repeated_reads_hit_the_cache() {
    let (app, store) = setup(memory_cache());
    create(&app, "Widget").await;

    for _ in 0..3 {
        let (status, page) = call(&app, Method::GET, "/api/items", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["totalCount"], 1);
    }

    assert_eq!(store.list_calls(), 1);
}

#[tokio::test]
async fn every_write_drops_all_cached_pages() {
    let (app, store) = setup(memory_cache());
    let id = create(&app, "Widget").await;

    call(&app, Method::GET, "/api/items?pageNumber=1&pageSize=1", None).await;
    call(&app, Method::GET, "/api/items?pageNumber=2&pageSize=1", None).await;
    assert_eq!(store.list_calls(), 2);

    let (status, _) = call(
        &app,
        Method::PUT,
        &format!("/api/items/{id}"),
        Some(json!({ "name": "Gadget", "quantity": 9 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, page) = call(&app, Method::GET, "/api/items?pageNumber=1&pageSize=1", None).await;
    assert_eq!(page["items"][0]["name"], "Gadget");
    call(&app, Method::GET, "/api/items?pageNumber=2&pageSize=1", None).await;
    assert_eq!(store.list_calls(), 4);

    let (status, _) = call(&app, Method::DELETE, &format!("/api/items/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, page) = call(&app, Method::GET, "/api/items?pageNumber=1&pageSize=1", None).await;
    assert_eq!(page["totalCount"], 0);
    assert_eq!(store.list_calls(), 5);
}

#[tokio::test]
async fn rejected_writes_keep_cached_pages() {
    let (app, store) = setup(memory_cache());
    create(&app, "Widget").await;
    call(&app, Method::GET, "/api/items", None).await;
    assert_eq!(store.list_calls(), 1);

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/items",
        Some(json!({ "name": "", "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, Method::DELETE, "/api/items/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(&app, Method::GET, "/api/items", None).await;
    assert_eq!(store.list_calls(), 1);
}

#[tokio::test]
async fn disabled_cache_reads_through_every_time() {
    let (app, store) = setup(ResponseCache::disabled());
    create(&app, "Widget").await;

    call(&app, Method::GET, "/api/items", None).await;
    call(&app, Method::GET, "/api/items", None).await;

    assert_eq!(store.list_calls(), 2);
}
