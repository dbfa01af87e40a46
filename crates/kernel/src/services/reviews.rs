//! Review service.
//!
//! Reviews reference a tour and a user. After every committed review write
//! the affected tour's rating aggregate is recomputed; a failed recomputation
//! is logged and reported as a warning on the receipt, never as an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::resource::{
    Populate, Resource, WriteReceipt, embed_one, fetch_references, reference_ids,
    require_reference,
};
use super::users::active_filter;
use super::validate::{Mode, Validator, retain_fields};
use crate::error::{AppError, AppResult};
use crate::ratings::RatingAggregator;
use crate::store::document::{self, Document, ID_FIELD};
use crate::store::{Collection, StoreError};

/// User fields embedded into reviews.
pub const REVIEW_USER_FIELDS: [&str; 2] = ["name", "photo"];

const WRITABLE_FIELDS: [&str; 4] = ["review", "rating", "tour", "user"];

pub struct ReviewService {
    reviews: Arc<dyn Collection>,
    tours: Arc<dyn Collection>,
    users: Arc<dyn Collection>,
    ratings: RatingAggregator,
}

impl ReviewService {
    pub fn new(
        reviews: Arc<dyn Collection>,
        tours: Arc<dyn Collection>,
        users: Arc<dyn Collection>,
    ) -> Self {
        let ratings = RatingAggregator::new(reviews.clone(), tours.clone());
        Self {
            reviews,
            tours,
            users,
            ratings,
        }
    }

    /// Use a specific aggregator (tests substitute failing collections).
    pub fn with_aggregator(mut self, ratings: RatingAggregator) -> Self {
        self.ratings = ratings;
        self
    }

    /// Recompute a tour's aggregate, turning failure into a warning.
    async fn recompute(&self, tour_id: &str, warnings: &mut Vec<String>) {
        if let Err(e) = self.ratings.recompute_for(tour_id).await {
            tracing::warn!(tour_id, error = %e, "rating recomputation failed");
            warnings.push(format!(
                "Rating aggregate for tour {tour_id} could not be updated"
            ));
        }
    }

    async fn validate(&self, doc: &mut Document, mode: Mode) -> AppResult<()> {
        let mut v = Validator::new(mode);

        v.require(doc, "review", "Review can not be empty!");
        v.string(doc, "review");
        v.require(doc, "rating", "A review must have a rating");
        if let Some(rating) = v.number(doc, "rating") {
            v.check(
                (1.0..=5.0).contains(&rating),
                "Rating must be between 1 and 5",
            );
        }
        v.require(doc, "tour", "Review must belong to a tour.");
        let tour = v.reference(doc, "tour");
        v.require(doc, "user", "Review must belong to a user.");
        let user = v.reference(doc, "user");
        v.finish()?;

        if let Some(tour) = tour {
            require_reference(&self.tours, &tour, "tour").await?;
        }
        if let Some(user) = user {
            require_reference(&self.users, &user, "user").await?;
        }
        Ok(())
    }
}

fn tour_of(doc: &Document) -> Option<String> {
    doc.get("tour").and_then(Value::as_str).map(str::to_string)
}

fn map_duplicate(err: AppError) -> AppError {
    match err {
        AppError::Store(StoreError::Duplicate(_)) => {
            AppError::Conflict("You have already reviewed this tour.".to_string())
        }
        other => other,
    }
}

#[async_trait]
impl Resource for ReviewService {
    fn label(&self) -> &'static str {
        "review"
    }

    fn collection(&self) -> &Arc<dyn Collection> {
        &self.reviews
    }

    async fn prepare_create(&self, mut input: Document) -> AppResult<Document> {
        let mut allowed = WRITABLE_FIELDS.to_vec();
        allowed.push(ID_FIELD);
        retain_fields(&mut input, &allowed);
        self.validate(&mut input, Mode::Create).await?;
        Ok(input)
    }

    async fn prepare_update(&self, _current: &Document, mut patch: Document) -> AppResult<Document> {
        retain_fields(&mut patch, &WRITABLE_FIELDS);
        self.validate(&mut patch, Mode::Update).await?;
        Ok(patch)
    }

    async fn populate(&self, mut docs: Vec<Document>, _mode: Populate) -> AppResult<Vec<Document>> {
        let user_ids = docs.iter().flat_map(|d| reference_ids(d, "user")).collect();
        let users =
            fetch_references(&self.users, user_ids, active_filter(), &REVIEW_USER_FIELDS).await?;
        for doc in &mut docs {
            embed_one(doc, "user", &users);
        }
        Ok(docs)
    }

    async fn create(&self, input: Document) -> AppResult<WriteReceipt> {
        let prepared = self.prepare_create(input).await?;
        let stored = self
            .reviews
            .insert(prepared)
            .await
            .map_err(|e| map_duplicate(e.into()))?;
        tracing::info!(id = document::id_of(&stored).unwrap_or_default(), "review created");

        let mut receipt = WriteReceipt::new(self.output(stored));
        if let Some(tour_id) = tour_of(&receipt.document) {
            self.recompute(&tour_id, &mut receipt.warnings).await;
        }
        Ok(receipt)
    }

    async fn update(&self, id: &str, patch: Document) -> AppResult<WriteReceipt> {
        let current = self
            .find_visible(id)
            .await?
            .ok_or_else(AppError::no_document)?;
        let previous_tour = tour_of(&current);

        let prepared = self.prepare_update(&current, patch).await?;
        let updated = self
            .reviews
            .update_by_id(id, prepared)
            .await
            .map_err(|e| map_duplicate(e.into()))?
            .ok_or_else(AppError::no_document)?;
        tracing::info!(id, "review updated");

        let mut receipt = WriteReceipt::new(self.output(updated));
        let current_tour = tour_of(&receipt.document);
        if let Some(tour_id) = &previous_tour {
            self.recompute(tour_id, &mut receipt.warnings).await;
        }
        if let Some(tour_id) = current_tour.filter(|t| Some(t) != previous_tour.as_ref()) {
            self.recompute(&tour_id, &mut receipt.warnings).await;
        }
        Ok(receipt)
    }

    async fn delete(&self, id: &str) -> AppResult<WriteReceipt> {
        let current = self
            .find_visible(id)
            .await?
            .ok_or_else(AppError::no_document)?;
        let previous_tour = tour_of(&current);

        let deleted = self
            .reviews
            .delete_by_id(id)
            .await?
            .ok_or_else(AppError::no_document)?;
        tracing::info!(id, "review deleted");

        let mut receipt = WriteReceipt::new(self.output(deleted));
        if let Some(tour_id) = previous_tour {
            self.recompute(&tour_id, &mut receipt.warnings).await;
        }
        Ok(receipt)
    }
}
