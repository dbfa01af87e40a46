//! Tour-specific endpoints: alias listing, reports and geo search.

use axum::extract::{Path, RawQuery, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::error::{AppError, AppResult};
use crate::geo::{self, DistanceUnit, LatLng};
use crate::query::Filter;
use crate::services::Resource;
use crate::services::tours::apply_top_five_cheap;
use crate::state::AppState;

use super::factory::{list_response, query_params};

/// Five best-rated cheapest tours; alias values override the request's.
async fn top_five_cheap(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> AppResult<Json<Value>> {
    let mut params = query_params(query);
    apply_top_five_cheap(&mut params);
    let docs = state.tours().list(Filter::new(), &params).await?;
    Ok(list_response(docs))
}

async fn tour_stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = state.tours().stats().await?;
    Ok(Json(json!({
        "status": "success",
        "data": { "stats": stats },
    })))
}

async fn monthly_plan(
    State(state): State<AppState>,
    Path(year): Path<String>,
) -> AppResult<Json<Value>> {
    let year: i32 = year
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid year: {year}")))?;
    let plan = state.tours().monthly_plan(year).await?;
    Ok(Json(json!({
        "status": "success",
        "data": { "plan": plan },
    })))
}

async fn tours_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> AppResult<Json<Value>> {
    let distance = geo::parse_distance(&distance)?;
    let center: LatLng = latlng.parse()?;
    let unit: DistanceUnit = unit.parse()?;
    let docs = state.tours().within(distance, center, unit).await?;
    Ok(list_response(docs))
}

async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let center: LatLng = latlng.parse()?;
    let unit: DistanceUnit = unit.parse()?;
    let rows = state.tours().distances(center, unit).await?;
    Ok(Json(json!({
        "status": "success",
        "data": { "data": rows },
    })))
}

/// Create the tour extras router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/tours/top-5-cheap", get(top_five_cheap))
        .route("/api/v1/tours/tour-stats", get(tour_stats))
        .route("/api/v1/tours/monthly-plan/{year}", get(monthly_plan))
        .route(
            "/api/v1/tours/tours-within/{distance}/center/{latlng}/unit/{unit}",
            get(tours_within),
        )
        .route(
            "/api/v1/tours/distances/{latlng}/unit/{unit}",
            get(distances),
        )
}
