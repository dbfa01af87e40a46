//! Generic CRUD handlers shared by every resource.
//!
//! `crud_router::<R>(base)` mounts list/create on `base` and
//! read/update/delete on `base/{id}` for the service selected by `R`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::error::{AppError, AppResult};
use crate::query::{Filter, QueryParams};
use crate::services::{Resource, WriteReceipt};
use crate::state::AppState;
use crate::store::document::{self, Document};

/// Selects a resource service from the application state.
pub trait ResourceKind: Send + Sync + 'static {
    fn service(state: &AppState) -> Arc<dyn Resource>;
}

pub struct Tours;
pub struct Users;
pub struct Reviews;
pub struct Bookings;

impl ResourceKind for Tours {
    fn service(state: &AppState) -> Arc<dyn Resource> {
        state.tours().clone()
    }
}

impl ResourceKind for Users {
    fn service(state: &AppState) -> Arc<dyn Resource> {
        state.users().clone()
    }
}

impl ResourceKind for Reviews {
    fn service(state: &AppState) -> Arc<dyn Resource> {
        state.reviews().clone()
    }
}

impl ResourceKind for Bookings {
    fn service(state: &AppState) -> Arc<dyn Resource> {
        state.bookings().clone()
    }
}

/// List envelope: `{status, results, data: {data: [...]}}`.
pub fn list_response(docs: Vec<Document>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "results": docs.len(),
        "data": { "data": docs },
    }))
}

/// Single-document envelope, with `warnings` when a follow-up failed.
pub fn document_response(receipt: WriteReceipt) -> Json<Value> {
    let mut body = json!({
        "status": "success",
        "data": { "data": receipt.document },
    });
    if !receipt.warnings.is_empty() {
        body["warnings"] = json!(receipt.warnings);
    }
    Json(body)
}

/// Validate a path id, returning its canonical form.
pub fn parse_id(raw: &str) -> AppResult<String> {
    document::normalize_id(raw).ok_or_else(|| AppError::invalid_id(raw))
}

/// Unwrap a JSON object body, turning extractor rejections into 400s.
pub fn json_body(payload: Result<Json<Document>, JsonRejection>) -> AppResult<Document> {
    payload
        .map(|Json(doc)| doc)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// Parse the raw query string of a request.
pub fn query_params(raw: Option<String>) -> QueryParams {
    QueryParams::parse(raw.as_deref().unwrap_or_default())
}

async fn get_all<R: ResourceKind>(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    let params = query_params(query);
    let docs = R::service(&state).list(Filter::new(), &params).await?;
    Ok(list_response(docs))
}

async fn get_one<R: ResourceKind>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id)?;
    let doc = R::service(&state).get(&id).await?;
    Ok(document_response(WriteReceipt::new(doc)))
}

async fn create_one<R: ResourceKind>(
    State(state): State<AppState>,
    payload: Result<Json<Document>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let input = json_body(payload)?;
    let receipt = R::service(&state).create(input).await?;
    Ok((StatusCode::CREATED, document_response(receipt)))
}

async fn update_one<R: ResourceKind>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Document>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let id = parse_id(&id)?;
    let patch = json_body(payload)?;
    let receipt = R::service(&state).update(&id, patch).await?;
    Ok(document_response(receipt))
}

async fn delete_one<R: ResourceKind>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_id(&id)?;
    let receipt = R::service(&state).delete(&id).await?;
    // No body on 204; follow-up failures were already logged.
    if !receipt.warnings.is_empty() {
        tracing::warn!(id, warnings = ?receipt.warnings, "delete committed with warnings");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Create the CRUD router for one resource.
pub fn crud_router<R: ResourceKind>(base: &str) -> Router<AppState> {
    Router::new()
        .route(base, get(get_all::<R>).post(create_one::<R>))
        .route(
            &format!("{base}/{{id}}"),
            get(get_one::<R>)
                .patch(update_one::<R>)
                .delete(delete_one::<R>),
        )
}
