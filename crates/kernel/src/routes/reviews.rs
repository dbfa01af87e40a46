//! Reviews nested under a tour: `/api/v1/tours/{id}/reviews`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;

use crate::error::AppResult;
use crate::query::Filter;
use crate::services::Resource;
use crate::state::AppState;
use crate::store::document::Document;

use super::factory::{document_response, json_body, list_response, parse_id, query_params};

/// Reviews of one tour.
async fn tour_reviews(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    let tour_id = parse_id(&tour_id)?;
    let params = query_params(query);
    let docs = state
        .reviews()
        .list(Filter::new().eq("tour", tour_id), &params)
        .await?;
    Ok(list_response(docs))
}

/// Create a review; the tour comes from the path unless the body names one.
async fn create_tour_review(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    payload: Result<Json<Document>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let tour_id = parse_id(&tour_id)?;
    let mut input = json_body(payload)?;
    if input.get("tour").is_none_or(Value::is_null) {
        input.insert("tour".to_string(), Value::String(tour_id));
    }
    let receipt = state.reviews().create(input).await?;
    Ok((StatusCode::CREATED, document_response(receipt)))
}

/// Create the nested reviews router.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/v1/tours/{id}/reviews",
        get(tour_reviews).post(create_tour_review),
    )
}
