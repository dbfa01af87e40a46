#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Query feature builder tests against a real collection.
//!
//! Requests are parsed exactly as the HTTP layer parses them and the built
//! queries are executed on the memory backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use tourbook_kernel::aggregate::Pipeline;
use tourbook_kernel::query::{QueryFeatures, QueryParams, QueryPlan};
use tourbook_kernel::store::{Collection, Document, MemoryCollection, Query, StoreError};

mod common;
use common::doc;

async fn hikes() -> Arc<dyn Collection> {
    let collection: Arc<dyn Collection> = Arc::new(MemoryCollection::new("hikes"));
    let docs = [
        json!({ "name": "Lake Loop", "duration": 3, "difficulty": "easy",
                "price": { "amount": 90, "currency": "usd" },
                "tags": ["lake", "family"], "createdAt": "2026-01-01T00:00:00.000Z" }),
        json!({ "name": "Ridge Run", "duration": 5, "difficulty": "medium",
                "price": { "amount": 240, "currency": "eur" },
                "tags": ["mountain"], "createdAt": "2026-01-02T00:00:00.000Z" }),
        json!({ "name": "Summit Push", "duration": 9, "difficulty": "difficult",
                "price": { "amount": 610, "currency": "usd" },
                "tags": ["mountain", "snow"], "createdAt": "2026-01-03T00:00:00.000Z" }),
        json!({ "name": "Valley Walk", "duration": 6, "difficulty": "easy",
                "price": { "amount": 120, "currency": "usd" },
                "tags": [], "createdAt": "2026-01-04T00:00:00.000Z" }),
    ];
    for value in docs {
        collection.insert(doc(value)).await.unwrap();
    }
    collection
}

async fn run(collection: &Arc<dyn Collection>, query: &str) -> Vec<String> {
    let params = QueryParams::parse(query);
    QueryFeatures::new(Query::new(collection.clone()), &params)
        .all()
        .into_query()
        .execute()
        .await
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn default_order_is_newest_first() {
    let hikes = hikes().await;
    assert_eq!(
        run(&hikes, "").await,
        ["Valley Walk", "Summit Push", "Ridge Run", "Lake Loop"]
    );
}

#[tokio::test]
async fn range_operators_and_sub_fields() {
    let hikes = hikes().await;
    assert_eq!(
        run(&hikes, "duration[gte]=5&duration[lt]=9&sort=duration").await,
        ["Ridge Run", "Valley Walk"]
    );
    assert_eq!(
        run(&hikes, "price[currency]=usd&price[amount][lte]=200&sort=name").await,
        ["Lake Loop", "Valley Walk"]
    );
}

#[tokio::test]
async fn operator_words_are_matched_whole() {
    let hikes = hikes().await;
    // `gtex` is a sub-field path, not an operator.
    assert!(run(&hikes, "duration[gtex]=1").await.is_empty());
    assert!(run(&hikes, "ingtest=1").await.is_empty());
}

#[tokio::test]
async fn cross_type_comparisons_never_match() {
    let hikes = hikes().await;
    assert!(run(&hikes, "name[gte]=5").await.is_empty());
    assert!(run(&hikes, "duration[gte]=abc").await.is_empty());
}

#[tokio::test]
async fn arrays_match_any_element_and_membership() {
    let hikes = hikes().await;
    assert_eq!(
        run(&hikes, "tags=mountain&sort=name").await,
        ["Ridge Run", "Summit Push"]
    );
    assert_eq!(
        run(&hikes, "difficulty=easy&difficulty=difficult&sort=-duration").await,
        ["Summit Push", "Valley Walk", "Lake Loop"]
    );
}

#[tokio::test]
async fn unsafe_field_paths_match_nothing() {
    let hikes = hikes().await;
    assert!(run(&hikes, "name%24where=Lake%20Loop").await.is_empty());
    assert!(run(&hikes, "a..b=1").await.is_empty());
}

#[tokio::test]
async fn projection_and_pagination() {
    let hikes = hikes().await;
    let params = QueryParams::parse("sort=duration&fields=name,-duration&limit=2&page=2");
    let docs = QueryFeatures::new(Query::new(hikes.clone()), &params)
        .all()
        .into_query()
        .execute()
        .await
        .unwrap();

    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["name"], "Valley Walk");
    assert_eq!(docs[1]["name"], "Summit Push");
    let keys: Vec<&str> = docs[0].keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&"id") && keys.contains(&"name"));

    let params = QueryParams::parse("fields=-tags,-price");
    let docs = QueryFeatures::new(Query::new(hikes), &params)
        .all()
        .into_query()
        .execute()
        .await
        .unwrap();
    assert!(docs.iter().all(|d| !d.contains_key("tags") && !d.contains_key("price")));
    assert!(docs.iter().all(|d| d.contains_key("__v")));
}

#[tokio::test]
async fn stage_order_does_not_matter() {
    let hikes = hikes().await;
    let params = QueryParams::parse("difficulty=easy&sort=-price.amount&fields=name&limit=1");

    let a = QueryFeatures::new(Query::new(hikes.clone()), &params)
        .filter()
        .sort()
        .limit_fields()
        .paginate();
    let b = QueryFeatures::new(Query::new(hikes.clone()), &params)
        .paginate()
        .limit_fields()
        .sort()
        .filter();
    assert_eq!(a.plan(), b.plan());

    let a = a.into_query().execute().await.unwrap();
    let b = b.into_query().execute().await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a[0]["name"], json!("Valley Walk"));
}

/// Collection that counts reads.
struct CountingReads {
    inner: MemoryCollection,
    finds: AtomicUsize,
}

#[async_trait]
impl Collection for CountingReads {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find(&self, plan: &QueryPlan) -> Result<Vec<Document>, StoreError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.inner.find(plan).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.find_by_id(id).await
    }

    async fn insert(&self, doc: Document) -> Result<Document, StoreError> {
        self.inner.insert(doc).await
    }

    async fn update_by_id(&self, id: &str, patch: Document) -> Result<Option<Document>, StoreError> {
        self.inner.update_by_id(id, patch).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.delete_by_id(id).await
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        self.inner.delete_all().await
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError> {
        self.inner.aggregate(pipeline).await
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn building_never_touches_the_store() {
    let counting = Arc::new(CountingReads {
        inner: MemoryCollection::new("counted"),
        finds: AtomicUsize::new(0),
    });
    counting
        .insert(doc(json!({ "name": "Only" })))
        .await
        .unwrap();

    let collection: Arc<dyn Collection> = counting.clone();
    let params = QueryParams::parse("name=Only&sort=name&fields=name&page=1");
    let query = QueryFeatures::new(Query::new(collection), &params)
        .all()
        .into_query();
    assert_eq!(counting.finds.load(Ordering::SeqCst), 0);

    let docs = query.execute().await.unwrap();
    assert_eq!(counting.finds.load(Ordering::SeqCst), 1);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["name"], Value::from("Only"));
}
