//! Document collection abstraction.
//!
//! Every resource lives in a [`Collection`]: a schema-flexible set of JSON
//! documents read through [`QueryPlan`]s and aggregation [`Pipeline`]s.
//!
//! Two implementations exist:
//!
//! - [`PgCollection`] stores documents in a PostgreSQL JSONB table and
//!   compiles plans to SQL.
//! - [`MemoryCollection`] keeps documents in process; used by tests and the
//!   `STORE=memory` development mode.
//!
//! # Usage
//!
//! ```ignore
//! let query = Query::filtered(collection, Filter::new().eq("tour", tour_id));
//! let reviews = query.execute().await?;
//! ```

pub mod document;
mod memory;
mod postgres;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use document::Document;
pub use memory::MemoryCollection;
pub use postgres::PgCollection;

use crate::aggregate::Pipeline;
use crate::query::plan::{Filter, QueryPlan};

/// Errors raised by a collection.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("duplicate value for {0}")]
    Duplicate(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be read back as a document.
    #[error("malformed document: {0}")]
    Malformed(String),

    /// The backend cannot serve requests (used by test doubles and health).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A named collection of documents.
#[async_trait]
pub trait Collection: Send + Sync {
    /// Collection name (table name for Postgres).
    fn name(&self) -> &str;

    /// Run a read plan: filter, sort, window, then project.
    async fn find(&self, plan: &QueryPlan) -> Result<Vec<Document>, StoreError>;

    /// Load a document by id.
    ///
    /// Returns `None` if it doesn't exist.
    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// First document matching a filter.
    async fn find_one(&self, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let plan = QueryPlan {
            limit: Some(1),
            ..QueryPlan::filtered(filter.clone())
        };
        Ok(self.find(&plan).await?.into_iter().next())
    }

    /// Insert a document, assigning `id`, `createdAt` and `__v`.
    async fn insert(&self, doc: Document) -> Result<Document, StoreError>;

    /// Shallow-merge a patch into a document.
    ///
    /// Returns the updated document, or `None` if the id is unknown.
    async fn update_by_id(&self, id: &str, patch: Document)
    -> Result<Option<Document>, StoreError>;

    /// Delete a document, returning it if it existed.
    async fn delete_by_id(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Remove every document. Returns how many were removed.
    async fn delete_all(&self) -> Result<u64, StoreError>;

    /// Evaluate an aggregation pipeline over the collection.
    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError>;

    /// Check the backend is reachable.
    async fn ping(&self) -> bool;
}

/// A configured, not-yet-executed read against a collection.
#[derive(Clone)]
pub struct Query {
    collection: Arc<dyn Collection>,
    plan: QueryPlan,
}

impl Query {
    /// Read the whole collection.
    pub fn new(collection: Arc<dyn Collection>) -> Self {
        Self {
            collection,
            plan: QueryPlan::all(),
        }
    }

    /// Read documents matching a base filter.
    pub fn filtered(collection: Arc<dyn Collection>, filter: Filter) -> Self {
        Self {
            collection,
            plan: QueryPlan::filtered(filter),
        }
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn plan_mut(&mut self) -> &mut QueryPlan {
        &mut self.plan
    }

    pub fn collection(&self) -> &Arc<dyn Collection> {
        &self.collection
    }

    /// Run the query.
    pub async fn execute(&self) -> Result<Vec<Document>, StoreError> {
        tracing::debug!(collection = self.collection.name(), plan = ?self.plan, "executing query");
        self.collection.find(&self.plan).await
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("collection", &self.collection.name())
            .field("plan", &self.plan)
            .finish()
    }
}
