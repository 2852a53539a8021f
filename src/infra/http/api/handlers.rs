use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::application::items::{CreateItemCommand, DeleteItemCommand, UpdateItemCommand};
use crate::application::pagination::{PagedResult, PagingParameters};

use super::error::ApiError;
use super::models::{ItemDto, ItemListQuery, ItemWriteRequest};
use super::state::ApiState;

pub async fn list_items(
    State(state): State<ApiState>,
    query: Result<Query<ItemListQuery>, QueryRejection>,
) -> Result<Json<PagedResult<ItemDto>>, ApiError> {
    let Query(query) =
        query.map_err(|err| ApiError::bad_request("Invalid query", Some(err.body_text())))?;
    let paging = PagingParameters::new(query.page_number, query.page_size);

    let page = state.items.list_items(paging).await?;
    Ok(Json(page.map(ItemDto::from)))
}

pub async fn get_item(
    State(state): State<ApiState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ItemDto>, ApiError> {
    let id = item_id(id)?;
    let item = state.items.get_item(id).await?;
    Ok(Json(item.into()))
}

pub async fn create_item(
    State(state): State<ApiState>,
    payload: Result<Json<ItemWriteRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload
        .map_err(|err| ApiError::bad_request("Invalid request body", Some(err.body_text())))?;

    let item = state
        .items
        .create_item(CreateItemCommand {
            name: payload.name,
            quantity: payload.quantity,
        })
        .await?;

    let location = format!("/api/items/{}", item.id);
    let mut response = (StatusCode::CREATED, Json(ItemDto::from(item))).into_response();
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    Ok(response)
}

pub async fn update_item(
    State(state): State<ApiState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ItemWriteRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let id = item_id(id)?;
    let Json(payload) = payload
        .map_err(|err| ApiError::bad_request("Invalid request body", Some(err.body_text())))?;

    state
        .items
        .update_item(UpdateItemCommand {
            id,
            name: payload.name,
            quantity: payload.quantity,
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_item(
    State(state): State<ApiState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let id = item_id(id)?;
    state.items.delete_item(DeleteItemCommand { id }).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn item_id(id: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    id.map(|Path(id)| id)
        .map_err(|err| ApiError::bad_request("Invalid item id", Some(err.body_text())))
}
