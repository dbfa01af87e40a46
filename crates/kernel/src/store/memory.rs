//! In-process document collection.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::document::{self, Document};
use super::{Collection, StoreError};
use crate::aggregate::Pipeline;
use crate::query::matcher;
use crate::query::plan::QueryPlan;

/// A collection held in memory behind a `parking_lot::RwLock`.
///
/// Documents keep insertion order. The lock is never held across an await.
pub struct MemoryCollection {
    name: String,
    docs: RwLock<Vec<Document>>,
    unique: Vec<Vec<String>>,
}

impl MemoryCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(Vec::new()),
            unique: Vec::new(),
        }
    }

    /// Declare a unique index over one or more fields.
    ///
    /// Documents missing any of the fields are not indexed.
    pub fn with_unique_index(mut self, fields: &[&str]) -> Self {
        self.unique
            .push(fields.iter().map(|f| (*f).to_string()).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    /// Find a unique index the candidate would violate.
    fn violated_index(&self, docs: &[Document], candidate: &Document) -> Option<String> {
        let candidate_id = document::id_of(candidate);
        for index in &self.unique {
            let Some(key) = index_key(index, candidate) else {
                continue;
            };
            let clash = docs.iter().any(|existing| {
                document::id_of(existing) != candidate_id
                    && index_key(index, existing).as_ref() == Some(&key)
            });
            if clash {
                return Some(index.join(", "));
            }
        }
        None
    }
}

fn index_key(fields: &[String], doc: &Document) -> Option<Vec<Value>> {
    fields
        .iter()
        .map(|f| document::get_path(doc, f).filter(|v| !v.is_null()).cloned())
        .collect()
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, plan: &QueryPlan) -> Result<Vec<Document>, StoreError> {
        let mut matched: Vec<Document> = self
            .docs
            .read()
            .iter()
            .filter(|doc| matcher::matches(&plan.filter, doc))
            .cloned()
            .collect();

        matcher::sort_documents(&mut matched, &plan.sort);

        let skip = usize::try_from(plan.skip).unwrap_or(usize::MAX);
        let limit = plan
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| plan.projection.apply(doc))
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .docs
            .read()
            .iter()
            .find(|doc| document::id_of(doc) == Some(id))
            .cloned())
    }

    async fn insert(&self, mut doc: Document) -> Result<Document, StoreError> {
        document::stamp_new(&mut doc);

        let mut docs = self.docs.write();
        if let Some(id) = document::id_of(&doc)
            && docs.iter().any(|d| document::id_of(d) == Some(id))
        {
            return Err(StoreError::Duplicate(document::ID_FIELD.to_string()));
        }
        if let Some(index) = self.violated_index(&docs, &doc) {
            return Err(StoreError::Duplicate(index));
        }
        docs.push(doc.clone());
        Ok(doc)
    }

    async fn update_by_id(
        &self,
        id: &str,
        patch: Document,
    ) -> Result<Option<Document>, StoreError> {
        let mut docs = self.docs.write();
        let Some(position) = docs.iter().position(|d| document::id_of(d) == Some(id)) else {
            return Ok(None);
        };

        let mut updated = docs[position].clone();
        document::apply_patch(&mut updated, patch);
        if let Some(index) = self.violated_index(&docs, &updated) {
            return Err(StoreError::Duplicate(index));
        }
        docs[position] = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let mut docs = self.docs.write();
        let position = docs.iter().position(|d| document::id_of(d) == Some(id));
        Ok(position.map(|p| docs.remove(p)))
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut docs = self.docs.write();
        let removed = docs.len() as u64;
        docs.clear();
        Ok(removed)
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError> {
        let snapshot = self.docs.read().clone();
        Ok(pipeline.run(snapshot))
    }

    async fn ping(&self) -> bool {
        true
    }
}
