//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::info;

use crate::config::{Config, StoreBackend};
use crate::db;
use crate::services::{BookingService, ReviewService, TourService, UserService};
use crate::store::{Collection, MemoryCollection, PgCollection};

/// The four document collections.
#[derive(Clone)]
pub struct Stores {
    pub tours: Arc<dyn Collection>,
    pub users: Arc<dyn Collection>,
    pub reviews: Arc<dyn Collection>,
    pub bookings: Arc<dyn Collection>,
}

impl Stores {
    /// In-process collections with the same unique indexes as the database.
    pub fn memory() -> Self {
        Self {
            tours: Arc::new(MemoryCollection::new("tours").with_unique_index(&["name"])),
            users: Arc::new(MemoryCollection::new("users").with_unique_index(&["email"])),
            reviews: Arc::new(
                MemoryCollection::new("reviews").with_unique_index(&["tour", "user"]),
            ),
            bookings: Arc::new(MemoryCollection::new("bookings")),
        }
    }

    /// JSONB tables created by the migrations.
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            tours: Arc::new(
                PgCollection::new(pool.clone(), "tours")
                    .with_unique_index("tours_name_unique", &["name"]),
            ),
            users: Arc::new(
                PgCollection::new(pool.clone(), "users")
                    .with_unique_index("users_email_unique", &["email"]),
            ),
            reviews: Arc::new(
                PgCollection::new(pool.clone(), "reviews")
                    .with_unique_index("reviews_tour_user_unique", &["tour", "user"]),
            ),
            bookings: Arc::new(PgCollection::new(pool, "bookings")),
        }
    }

    /// Every collection, for bulk operations.
    pub fn all(&self) -> [&Arc<dyn Collection>; 4] {
        [&self.tours, &self.users, &self.reviews, &self.bookings]
    }
}

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    stores: Stores,
    tours: Arc<TourService>,
    users: Arc<UserService>,
    reviews: Arc<ReviewService>,
    bookings: Arc<BookingService>,
}

impl AppState {
    /// Create application state, connecting to the configured store.
    pub async fn new(config: &Config) -> Result<Self> {
        let stores = match config.store {
            StoreBackend::Memory => {
                info!("Using in-memory document store");
                Stores::memory()
            }
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL is required for the postgres store")?;
                let pool = db::create_pool(url, config.database_max_connections)
                    .await
                    .context("failed to create database pool")?;
                db::run_migrations(&pool)
                    .await
                    .context("failed to run migrations")?;
                info!("PostgreSQL document store ready");
                Stores::postgres(pool)
            }
        };

        Ok(Self::from_stores(stores))
    }

    /// Build state over existing collections.
    pub fn from_stores(stores: Stores) -> Self {
        let tours = Arc::new(TourService::new(
            stores.tours.clone(),
            stores.users.clone(),
            stores.reviews.clone(),
        ));
        let users = Arc::new(UserService::new(stores.users.clone()));
        let reviews = Arc::new(ReviewService::new(
            stores.reviews.clone(),
            stores.tours.clone(),
            stores.users.clone(),
        ));
        let bookings = Arc::new(BookingService::new(
            stores.bookings.clone(),
            stores.tours.clone(),
            stores.users.clone(),
        ));

        Self {
            inner: Arc::new(AppStateInner {
                stores,
                tours,
                users,
                reviews,
                bookings,
            }),
        }
    }

    /// Replace the review service (e.g. with a custom rating aggregator).
    pub fn with_review_service(self, reviews: ReviewService) -> Self {
        let inner = AppStateInner {
            stores: self.inner.stores.clone(),
            tours: self.inner.tours.clone(),
            users: self.inner.users.clone(),
            reviews: Arc::new(reviews),
            bookings: self.inner.bookings.clone(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.inner.stores
    }

    pub fn tours(&self) -> &Arc<TourService> {
        &self.inner.tours
    }

    pub fn users(&self) -> &Arc<UserService> {
        &self.inner.users
    }

    pub fn reviews(&self) -> &Arc<ReviewService> {
        &self.inner.reviews
    }

    pub fn bookings(&self) -> &Arc<BookingService> {
        &self.inner.bookings
    }
}
