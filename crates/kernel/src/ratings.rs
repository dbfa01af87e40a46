//! Rating aggregation.
//!
//! Tours carry a denormalized review count and average
//! (`ratingsQuantity` / `ratingsAverage`). [`RatingAggregator::recompute_for`]
//! rebuilds both from the full review set of one tour and is the only writer
//! of those fields. Review writes call it explicitly once they are committed.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::aggregate::{Accumulator, Group, GroupKey, Pipeline};
use crate::query::plan::Filter;
use crate::store::{Collection, Document, StoreError};

/// Average stored on a tour with no reviews.
pub const NEUTRAL_AVERAGE: f64 = 4.5;

/// Tour field holding the review count.
pub const QUANTITY_FIELD: &str = "ratingsQuantity";

/// Tour field holding the rounded review average.
pub const AVERAGE_FIELD: &str = "ratingsAverage";

/// Summary statistics of a tour's reviews.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReviewAggregate {
    pub count: u64,
    pub average: f64,
}

impl ReviewAggregate {
    /// The aggregate of a tour without reviews.
    pub fn empty() -> Self {
        Self {
            count: 0,
            average: NEUTRAL_AVERAGE,
        }
    }

    fn as_patch(&self) -> Document {
        let mut patch = Document::new();
        patch.insert(QUANTITY_FIELD.to_string(), Value::from(self.count));
        patch.insert(AVERAGE_FIELD.to_string(), Value::from(self.average));
        patch
    }
}

/// Round to one decimal place.
pub fn round_average(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Recomputes review aggregates onto tours.
#[derive(Clone)]
pub struct RatingAggregator {
    reviews: Arc<dyn Collection>,
    tours: Arc<dyn Collection>,
}

impl RatingAggregator {
    pub fn new(reviews: Arc<dyn Collection>, tours: Arc<dyn Collection>) -> Self {
        Self { reviews, tours }
    }

    /// Reviews of one tour, grouped into a count and a mean rating.
    pub fn pipeline(tour_id: &str) -> Pipeline {
        Pipeline::new()
            .matching(Filter::new().eq("tour", tour_id))
            .group(
                Group::by(GroupKey::Field("tour".to_string()))
                    .with("nRating", Accumulator::Count)
                    .with("avgRating", Accumulator::Avg("rating".to_string())),
            )
    }

    /// Recompute and store the aggregate for a tour.
    ///
    /// A tour that no longer exists is logged and skipped, not an error.
    pub async fn recompute_for(&self, tour_id: &str) -> Result<ReviewAggregate, StoreError> {
        let stats = self.reviews.aggregate(&Self::pipeline(tour_id)).await?;

        let aggregate = stats
            .first()
            .and_then(|row| {
                let count = row.get("nRating").and_then(Value::as_u64)?;
                let average = row.get("avgRating").and_then(Value::as_f64)?;
                (count > 0).then(|| ReviewAggregate {
                    count,
                    average: round_average(average),
                })
            })
            .unwrap_or_else(ReviewAggregate::empty);

        let updated = self.tours.update_by_id(tour_id, aggregate.as_patch()).await?;
        if updated.is_none() {
            tracing::warn!(tour_id, "tour not found; review aggregate not stored");
        } else {
            tracing::debug!(
                tour_id,
                count = aggregate.count,
                average = aggregate.average,
                "review aggregate recomputed"
            );
        }

        Ok(aggregate)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryCollection;
    use crate::store::document;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn rounding() {
        assert_eq!(round_average(4.666_666), 4.7);
        assert_eq!(round_average(4.0), 4.0);
        assert_eq!(round_average(3.25), 3.3);
    }

    #[tokio::test]
    async fn recompute_writes_count_and_average() {
        let tours = Arc::new(MemoryCollection::new("tours"));
        let reviews = Arc::new(MemoryCollection::new("reviews"));
        let tour = tours.insert(doc(json!({ "name": "The Sea Explorer" }))).await.unwrap();
        let tour_id = document::id_of(&tour).unwrap().to_string();

        for rating in [5, 4, 5] {
            reviews
                .insert(doc(json!({ "tour": tour_id, "rating": rating })))
                .await
                .unwrap();
        }
        reviews
            .insert(doc(json!({ "tour": "other", "rating": 1 })))
            .await
            .unwrap();

        let aggregator = RatingAggregator::new(reviews, tours.clone());
        let aggregate = aggregator.recompute_for(&tour_id).await.unwrap();
        assert_eq!(aggregate, ReviewAggregate { count: 3, average: 4.7 });

        let stored = tours.find_by_id(&tour_id).await.unwrap().unwrap();
        assert_eq!(stored[QUANTITY_FIELD], json!(3));
        assert_eq!(stored[AVERAGE_FIELD], json!(4.7));
    }

    #[tokio::test]
    async fn no_reviews_resets_to_neutral() {
        let tours = Arc::new(MemoryCollection::new("tours"));
        let reviews = Arc::new(MemoryCollection::new("reviews"));
        let tour = tours
            .insert(doc(json!({ "ratingsQuantity": 9, "ratingsAverage": 2.0 })))
            .await
            .unwrap();
        let tour_id = document::id_of(&tour).unwrap().to_string();

        let aggregator = RatingAggregator::new(reviews, tours.clone());
        assert_eq!(
            aggregator.recompute_for(&tour_id).await.unwrap(),
            ReviewAggregate::empty()
        );
        let stored = tours.find_by_id(&tour_id).await.unwrap().unwrap();
        assert_eq!(stored[QUANTITY_FIELD], json!(0));
        assert_eq!(stored[AVERAGE_FIELD], json!(4.5));
    }

    #[tokio::test]
    async fn missing_tour_is_not_an_error() {
        let aggregator = RatingAggregator::new(
            Arc::new(MemoryCollection::new("reviews")),
            Arc::new(MemoryCollection::new("tours")),
        );
        assert!(aggregator.recompute_for("gone").await.is_ok());
    }
}
