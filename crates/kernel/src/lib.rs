//! Tourbook Kernel Library
//!
//! Tour booking API: document collections, query features, rating
//! aggregation and the axum routers. The `tourbook` binary runs the server
//! and the dev-data commands on top of this library.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod query;
pub mod ratings;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use state::{AppState, Stores};
