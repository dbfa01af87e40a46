//! Generic resource operations over a document collection.
//!
//! Every API resource implements [`Resource`]. The provided methods give the
//! standard list/get/create/update/delete behaviour; services customise it
//! through the hooks (`base_filter`, `prepare_create`, `prepare_update`,
//! `populate`, `present`) or by overriding whole operations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::query::matcher;
use crate::query::{Condition, Filter, FilterClause, Projection, QueryFeatures, QueryParams, QueryPlan};
use crate::store::document::{self, Document, ID_FIELD};
use crate::store::{Collection, Query, StoreError};

/// How much related data a read should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Populate {
    /// Collection listings.
    List,
    /// Single-document reads; may include heavier relations.
    Detail,
}

/// Result of a committed write.
///
/// `warnings` lists follow-up work that failed after the write succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    pub document: Document,
    pub warnings: Vec<String>,
}

impl WriteReceipt {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            warnings: Vec::new(),
        }
    }
}

/// A collection exposed through the API.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Singular name used in logs.
    fn label(&self) -> &'static str;

    fn collection(&self) -> &Arc<dyn Collection>;

    /// Filter applied to every read (hidden documents never match).
    fn base_filter(&self) -> Filter {
        Filter::new()
    }

    /// Validate and normalise input for a new document.
    async fn prepare_create(&self, input: Document) -> AppResult<Document> {
        Ok(input)
    }

    /// Validate and normalise a patch for an existing document.
    async fn prepare_update(&self, _current: &Document, patch: Document) -> AppResult<Document> {
        Ok(patch)
    }

    /// Resolve references and add computed fields.
    async fn populate(&self, docs: Vec<Document>, _mode: Populate) -> AppResult<Vec<Document>> {
        Ok(docs)
    }

    /// Final shaping before a document leaves the service.
    fn present(&self, doc: Document) -> Document {
        doc
    }

    /// Base read query, narrowed by a scope (e.g. reviews of one tour).
    fn query(&self, scope: Filter) -> Query {
        Query::filtered(self.collection().clone(), self.base_filter().and(scope))
    }

    /// Shape a single document for output: hide `__v`, then `present`.
    fn output(&self, doc: Document) -> Document {
        self.present(Projection::without_version().apply(doc))
    }

    /// Load a document if it exists and passes the base filter.
    async fn find_visible(&self, id: &str) -> AppResult<Option<Document>> {
        let doc = self.collection().find_by_id(id).await?;
        Ok(doc.filter(|d| matcher::matches(&self.base_filter(), d)))
    }

    /// List documents using request query parameters.
    async fn list(&self, scope: Filter, params: &QueryParams) -> AppResult<Vec<Document>> {
        let query = QueryFeatures::new(self.query(scope), params)
            .all()
            .into_query();
        let docs = query.execute().await?;
        let docs = self.populate(docs, Populate::List).await?;
        Ok(docs.into_iter().map(|doc| self.present(doc)).collect())
    }

    async fn get(&self, id: &str) -> AppResult<Document> {
        let doc = self
            .find_visible(id)
            .await?
            .ok_or_else(AppError::no_document)?;
        let mut docs = self.populate(vec![doc], Populate::Detail).await?;
        let doc = docs.pop().ok_or_else(AppError::no_document)?;
        Ok(self.output(doc))
    }

    async fn create(&self, input: Document) -> AppResult<WriteReceipt> {
        let prepared = self.prepare_create(input).await?;
        let stored = self.collection().insert(prepared).await?;
        tracing::info!(
            resource = self.label(),
            id = document::id_of(&stored).unwrap_or_default(),
            "document created"
        );
        Ok(WriteReceipt::new(self.output(stored)))
    }

    async fn update(&self, id: &str, patch: Document) -> AppResult<WriteReceipt> {
        let current = self
            .find_visible(id)
            .await?
            .ok_or_else(AppError::no_document)?;
        let prepared = self.prepare_update(&current, patch).await?;
        let updated = self
            .collection()
            .update_by_id(id, prepared)
            .await?
            .ok_or_else(AppError::no_document)?;
        tracing::info!(resource = self.label(), id, "document updated");
        Ok(WriteReceipt::new(self.output(updated)))
    }

    async fn delete(&self, id: &str) -> AppResult<WriteReceipt> {
        if self.find_visible(id).await?.is_none() {
            return Err(AppError::no_document());
        }
        let deleted = self
            .collection()
            .delete_by_id(id)
            .await?
            .ok_or_else(AppError::no_document)?;
        tracing::info!(resource = self.label(), id, "document deleted");
        Ok(WriteReceipt::new(self.output(deleted)))
    }
}

/// Load referenced documents by id in one read.
///
/// Only documents passing `visible` are returned, projected to `fields`
/// (plus `id`). Keys are document ids.
pub async fn fetch_references(
    collection: &Arc<dyn Collection>,
    ids: Vec<String>,
    visible: Filter,
    fields: &[&str],
) -> Result<HashMap<String, Document>, StoreError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut filter = visible;
    filter.push(FilterClause::new(
        ID_FIELD,
        Condition::In(ids.into_iter().map(Value::String).collect()),
    ));
    let plan = QueryPlan {
        projection: Projection::Include(fields.iter().map(|f| (*f).to_string()).collect()),
        ..QueryPlan::filtered(filter)
    };

    Ok(collection
        .find(&plan)
        .await?
        .into_iter()
        .filter_map(|doc| {
            let id = document::id_of(&doc)?.to_string();
            Some((id, doc))
        })
        .collect())
}

/// String ids held by a reference field (single id or list of ids).
pub fn reference_ids(doc: &Document, field: &str) -> Vec<String> {
    match doc.get(field) {
        Some(Value::String(id)) => vec![id.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Replace a single-id reference field with the referenced document, or null.
pub fn embed_one(doc: &mut Document, field: &str, found: &HashMap<String, Document>) {
    let Some(Value::String(id)) = doc.get(field) else {
        return;
    };
    let embedded = found.get(id).cloned().map_or(Value::Null, Value::Object);
    doc.insert(field.to_string(), embedded);
}

/// Replace a list-of-ids reference field with the referenced documents.
///
/// Ids that resolve to nothing are dropped.
pub fn embed_many(doc: &mut Document, field: &str, found: &HashMap<String, Document>) {
    let embedded: Vec<Value> = reference_ids(doc, field)
        .iter()
        .filter_map(|id| found.get(id).cloned().map(Value::Object))
        .collect();
    if doc.contains_key(field) {
        doc.insert(field.to_string(), Value::Array(embedded));
    }
}

/// Ensure a referenced document exists.
pub async fn require_reference(
    collection: &Arc<dyn Collection>,
    id: &str,
    label: &str,
) -> AppResult<()> {
    match collection.find_by_id(id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!("No {label} found with that ID"))),
    }
}
