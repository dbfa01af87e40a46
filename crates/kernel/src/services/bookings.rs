//! Booking service.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::resource::{
    Populate, Resource, embed_one, fetch_references, reference_ids, require_reference,
};
use super::users::active_filter;
use super::validate::{Mode, Validator, default_field, retain_fields};
use crate::error::{AppError, AppResult};
use crate::query::Filter;
use crate::store::document::{Document, ID_FIELD};
use crate::store::Collection;

const WRITABLE_FIELDS: [&str; 4] = ["tour", "user", "price", "paid"];

pub struct BookingService {
    bookings: Arc<dyn Collection>,
    tours: Arc<dyn Collection>,
    users: Arc<dyn Collection>,
}

impl BookingService {
    pub fn new(
        bookings: Arc<dyn Collection>,
        tours: Arc<dyn Collection>,
        users: Arc<dyn Collection>,
    ) -> Self {
        Self {
            bookings,
            tours,
            users,
        }
    }

    async fn validate(&self, doc: &mut Document, mode: Mode) -> AppResult<()> {
        let mut v = Validator::new(mode);
        v.require(doc, "tour", "Booking must belong to a tour.");
        let tour = v.reference(doc, "tour");
        v.require(doc, "user", "Booking must belong to a user.");
        let user = v.reference(doc, "user");
        if let Some(price) = v.number(doc, "price") {
            v.check(price >= 0.0, "Booking price must not be negative");
        }
        v.boolean(doc, "paid");
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

#[async_trait]
impl Resource for BookingService {
    fn label(&self) -> &'static str {
        "booking"
    }

    fn collection(&self) -> &Arc<dyn Collection> {
        &self.bookings
    }

    async fn prepare_create(&self, mut input: Document) -> AppResult<Document> {
        let mut allowed = WRITABLE_FIELDS.to_vec();
        allowed.push(ID_FIELD);
        retain_fields(&mut input, &allowed);
        self.validate(&mut input, Mode::Create).await?;

        if input.get("price").is_none_or(Value::is_null) {
            let tour_price = match input.get("tour").and_then(Value::as_str) {
                Some(tour_id) => self
                    .tours
                    .find_by_id(tour_id)
                    .await?
                    .and_then(|tour| tour.get("price").cloned()),
                None => None,
            };
            let price = tour_price
                .ok_or_else(|| AppError::BadRequest("Booking must have a price.".to_string()))?;
            input.insert("price".to_string(), price);
        }
        default_field(&mut input, "paid", Value::Bool(true));
        Ok(input)
    }

    async fn prepare_update(&self, _current: &Document, mut patch: Document) -> AppResult<Document> {
        retain_fields(&mut patch, &WRITABLE_FIELDS);
        self.validate(&mut patch, Mode::Update).await?;
        Ok(patch)
    }

    async fn populate(&self, mut docs: Vec<Document>, _mode: Populate) -> AppResult<Vec<Document>> {
        let tour_ids = docs.iter().flat_map(|d| reference_ids(d, "tour")).collect();
        let tours = fetch_references(&self.tours, tour_ids, Filter::new(), &["name"]).await?;
        let user_ids = docs.iter().flat_map(|d| reference_ids(d, "user")).collect();
        let users =
            fetch_references(&self.users, user_ids, active_filter(), &["name", "email"]).await?;

        for doc in &mut docs {
            embed_one(doc, "tour", &tours);
            embed_one(doc, "user", &users);
        }
        Ok(docs)
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

    #[tokio::test]
    async fn price_defaults_to_tour_price() {
        let tours: Arc<dyn Collection> = Arc::new(MemoryCollection::new("tours"));
        let users: Arc<dyn Collection> = Arc::new(MemoryCollection::new("users"));
        let bookings = BookingService::new(
            Arc::new(MemoryCollection::new("bookings")),
            tours.clone(),
            users.clone(),
        );

        let tour = tours
            .insert(doc(json!({ "name": "The Park Camper", "price": 1497 })))
            .await
            .unwrap();
        let user = users
            .insert(doc(json!({ "name": "Ana", "email": "ana@x.io" })))
            .await
            .unwrap();
        let tour_id = document::id_of(&tour).unwrap().to_string();
        let user_id = document::id_of(&user).unwrap().to_string();

        let receipt = bookings
            .create(doc(json!({ "tour": tour_id, "user": user_id })))
            .await
            .unwrap();
        assert_eq!(receipt.document["price"], json!(1497));
        assert_eq!(receipt.document["paid"], json!(true));

        let id = document::id_of(&receipt.document).unwrap().to_string();
        let populated = bookings.get(&id).await.unwrap();
        assert_eq!(populated["tour"]["name"], json!("The Park Camper"));
        assert_eq!(populated["user"]["email"], json!("ana@x.io"));
    }

    #[tokio::test]
    async fn missing_references_are_rejected() {
        let bookings = BookingService::new(
            Arc::new(MemoryCollection::new("bookings")),
            Arc::new(MemoryCollection::new("tours")),
            Arc::new(MemoryCollection::new("users")),
        );
        let err = bookings
            .create(doc(json!({ "tour": document::new_id(), "user": document::new_id() })))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref m) if m == "No tour found with that ID"));

        let err = bookings.create(Document::new()).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
