#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Every [`TestApp`] runs the real router and services over fresh in-memory
//! collections, so tests are independent and need no database.

#![allow(dead_code)]

use std::path::PathBuf;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use tourbook_kernel::store::Collection;
use tourbook_kernel::store::document::{self, Document};
use tourbook_kernel::{AppState, Stores, cli, routes};

/// Test application: state plus the full router.
pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    /// Fresh application over empty memory collections.
    pub fn new() -> Self {
        Self::with_state(AppState::from_stores(Stores::memory()))
    }

    pub fn with_state(state: AppState) -> Self {
        let router = routes::app(state.clone());
        Self { state, router }
    }

    /// Fresh application loaded with the repository's dev data.
    pub async fn with_dev_data() -> Self {
        let app = Self::new();
        cli::cmd_import(&app.state, &dev_data_dir())
            .await
            .expect("Failed to import dev data");
        app
    }

    /// Send a request to the test application.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    /// GET a path and decode the JSON body.
    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Invalid request");
        let response = self.request(request).await;
        read_json(response).await
    }

    /// Send a JSON body and decode the JSON response.
    pub async fn send(&self, method: Method, uri: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("Invalid request");
        let response = self.request(request).await;
        read_json(response).await
    }

    pub async fn post(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, body).await
    }

    pub async fn patch(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, body).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .body(Body::empty())
            .expect("Invalid request");
        let response = self.request(request).await;
        read_json(response).await
    }
}

/// Decode a response body; an empty body becomes `Value::Null`.
pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    if bytes.is_empty() {
        return (status, Value::Null);
    }
    let value = serde_json::from_slice(&bytes).expect("Response is not JSON");
    (status, value)
}

/// The `dev-data` directory at the repository root.
pub fn dev_data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../dev-data")
}

/// Unwrap a JSON object literal into a document.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("test document must be an object"),
    }
}

/// The id of a document in a response body.
pub fn id(value: &Value) -> String {
    value["id"].as_str().expect("document has an id").to_string()
}

/// Ids used by the dev data.
pub mod dev {
    pub const LAURA: &str = "0190a000-0000-7000-8000-000000000001";
    pub const SOPHIE: &str = "0190a000-0000-7000-8000-000000000004";
    pub const BEN: &str = "0190a000-0000-7000-8000-000000000005";

    pub const FOREST_HIKER: &str = "0190b000-0000-7000-8000-000000000001";
    pub const SEA_EXPLORER: &str = "0190b000-0000-7000-8000-000000000002";
    pub const SNOW_ADVENTURER: &str = "0190b000-0000-7000-8000-000000000003";
    pub const CITY_WANDERER: &str = "0190b000-0000-7000-8000-000000000004";
    pub const NORTHERN_LIGHTS: &str = "0190b000-0000-7000-8000-000000000005";

    pub const FOREST_REVIEW: &str = "0190c000-0000-7000-8000-000000000001";
}

/// A valid tour body with the given name.
pub fn tour_body(name: &str, price: u32) -> Value {
    serde_json::json!({
        "name": name,
        "duration": 5,
        "maxGroupSize": 10,
        "difficulty": "easy",
        "price": price,
        "summary": "A test tour",
        "imageCover": "cover.jpg",
        "startLocation": { "type": "Point", "coordinates": [-80.18, 25.77] },
    })
}

/// Create a user through the service layer and return its id.
pub async fn create_user(app: &TestApp, name: &str, email: &str) -> String {
    let (status, body) = app
        .post(
            "/api/v1/users",
            &serde_json::json!({ "name": name, "email": email }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id(&body["data"]["data"])
}

/// Create a tour through the API and return its id.
pub async fn create_tour(app: &TestApp, name: &str, price: u32) -> String {
    let (status, body) = app.post("/api/v1/tours", &tour_body(name, price)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id(&body["data"]["data"])
}

/// Read a tour document straight from the collection.
pub async fn stored_tour(app: &TestApp, tour_id: &str) -> Document {
    app.state
        .stores()
        .tours
        .find_by_id(tour_id)
        .await
        .expect("store read failed")
        .expect("tour exists")
}

/// `id` of a stored document.
pub fn stored_id(doc: &Document) -> String {
    document::id_of(doc).expect("stored document has an id").to_string()
}
