//! HTTP route handlers.

pub mod factory;
pub mod health;
pub mod reviews;
pub mod tours;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::Uri;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::AppState;

use factory::{Bookings, Reviews, Tours, Users};

/// Maximum accepted request body size.
pub const BODY_LIMIT: usize = 10 * 1024;

/// Build the application router with all API routes.
///
/// Cross-cutting layers (CORS, tracing) are added by the binary.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(tours::router())
        .merge(reviews::router())
        .merge(factory::crud_router::<Tours>("/api/v1/tours"))
        .merge(factory::crud_router::<Users>("/api/v1/users"))
        .merge(factory::crud_router::<Reviews>("/api/v1/reviews"))
        .merge(factory::crud_router::<Bookings>("/api/v1/bookings"))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

async fn not_found(uri: Uri) -> Response {
    AppError::NotFound(format!("Can't find {} on this server!", uri.path())).into_response()
}
