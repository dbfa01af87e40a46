//! Tour service: validation, derived fields, reports and geo search.

use std::ops::RangeInclusive;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::resource::{
    Populate, Resource, embed_many, embed_one, fetch_references, reference_ids,
};
use super::reviews::REVIEW_USER_FIELDS;
use super::users::active_filter;
use super::validate::{Mode, Validator, default_field, retain_fields};
use crate::aggregate::{Accumulator, GROUP_ID_FIELD, Group, GroupKey, Pipeline, number};
use crate::error::{AppError, AppResult};
use crate::geo::{self, DistanceUnit, LatLng};
use crate::query::{Filter, ParamValue, Projection, QueryParams, QueryPlan, RangeOp, SortKey};
use crate::ratings::{AVERAGE_FIELD, NEUTRAL_AVERAGE, QUANTITY_FIELD};
use crate::store::document::{self, Document, ID_FIELD};
use crate::store::{Collection, Query};

/// Query parameters of the "top 5 cheap" listing.
pub const TOP_FIVE_CHEAP: [(&str, &str); 3] = [
    ("limit", "5"),
    ("sort", "-ratingsAverage,price"),
    ("fields", "name,price,ratingsAverage,summary,difficulty"),
];

const DIFFICULTIES: [&str; 3] = ["easy", "medium", "difficult"];

/// Input fields a client may set. Aggregate fields and the slug are derived.
const WRITABLE_FIELDS: [&str; 14] = [
    "name",
    "duration",
    "maxGroupSize",
    "difficulty",
    "price",
    "priceDiscount",
    "summary",
    "description",
    "imageCover",
    "images",
    "startDates",
    "secretTour",
    "startLocation",
    "locations",
];

/// User fields embedded into `guides`.
const GUIDE_FIELDS: [&str; 4] = ["name", "email", "photo", "role"];

/// Years a monthly plan can cover.
pub const PLAN_YEARS: RangeInclusive<i32> = 1..=9999;

/// Minimum and maximum tour name length, in characters.
const NAME_LENGTH: (usize, usize) = (10, 40);

/// Replace `limit`, `sort` and `fields` with the "top 5 cheap" alias values.
pub fn apply_top_five_cheap(params: &mut QueryParams) {
    for (key, value) in TOP_FIVE_CHEAP {
        params.insert(key, ParamValue::Single(value.to_string()));
    }
}

/// Build a URL-safe slug from a tour name.
pub fn slugify(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();

    // Collapse runs of hyphens, skipping leading ones.
    let mut result = String::with_capacity(slug.len());
    let mut prev_was_hyphen = true;
    for c in slug.chars() {
        if c == '-' {
            if !prev_was_hyphen {
                result.push('-');
            }
            prev_was_hyphen = true;
        } else {
            result.push(c);
            prev_was_hyphen = false;
        }
    }
    while result.ends_with('-') {
        result.pop();
    }
    result
}

/// Tours, their reports and their geo queries.
pub struct TourService {
    tours: Arc<dyn Collection>,
    users: Arc<dyn Collection>,
    reviews: Arc<dyn Collection>,
}

impl TourService {
    pub fn new(
        tours: Arc<dyn Collection>,
        users: Arc<dyn Collection>,
        reviews: Arc<dyn Collection>,
    ) -> Self {
        Self {
            tours,
            users,
            reviews,
        }
    }

    /// Statistics per difficulty for well-rated tours, cheapest first.
    pub async fn stats(&self) -> AppResult<Vec<Document>> {
        let pipeline = Pipeline::new()
            .matching(self.base_filter())
            .matching(Filter::new().range(AVERAGE_FIELD, vec![(RangeOp::Gte, Value::from(4.5))]))
            .group(
                Group::by(GroupKey::Upper("difficulty".to_string()))
                    .with("numTours", Accumulator::Count)
                    .with("numRatings", Accumulator::Sum(QUANTITY_FIELD.to_string()))
                    .with("avgRating", Accumulator::Avg(AVERAGE_FIELD.to_string()))
                    .with("avgPrice", Accumulator::Avg("price".to_string()))
                    .with("minPrice", Accumulator::Min("price".to_string()))
                    .with("maxPrice", Accumulator::Max("price".to_string())),
            )
            .sort(vec![SortKey::asc("avgPrice")]);

        Ok(self.tours.aggregate(&pipeline).await?)
    }

    /// Tour starts per month of a year, busiest six months first.
    pub async fn monthly_plan(&self, year: i32) -> AppResult<Vec<Document>> {
        if !PLAN_YEARS.contains(&year) {
            return Err(AppError::BadRequest(format!("Invalid year: {year}")));
        }
        // Start dates are stored as fixed-width UTC timestamps.
        let within_year = Filter::new().range(
            "startDates",
            vec![
                (RangeOp::Gte, Value::String(format!("{year:04}-01-01T00:00:00.000Z"))),
                (RangeOp::Lte, Value::String(format!("{year:04}-12-31T23:59:59.999Z"))),
            ],
        );
        let pipeline = Pipeline::new()
            .matching(self.base_filter())
            .matching(within_year.clone())
            .unwind("startDates")
            .matching(within_year)
            .group(
                Group::by(GroupKey::Month("startDates".to_string()))
                    .with("numTourStarts", Accumulator::Count)
                    .with("tours", Accumulator::Push("name".to_string())),
            )
            .sort(vec![SortKey::desc("numTourStarts"), SortKey::asc(GROUP_ID_FIELD)])
            .limit(6);

        let rows = self.tours.aggregate(&pipeline).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                if let Some(month) = row.remove(GROUP_ID_FIELD) {
                    row.insert("month".to_string(), month);
                }
                row
            })
            .collect())
    }

    async fn located_tours(&self) -> AppResult<Vec<(Document, LatLng)>> {
        let docs = Query::filtered(self.tours.clone(), self.base_filter())
            .execute()
            .await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| {
                let point = doc.get("startLocation").and_then(geo::point_of)?;
                Some((doc, point))
            })
            .collect())
    }

    /// Tours starting within `distance` of `center`.
    pub async fn within(
        &self,
        distance: f64,
        center: LatLng,
        unit: DistanceUnit,
    ) -> AppResult<Vec<Document>> {
        let radius = distance / unit.earth_radius();
        let docs: Vec<Document> = self
            .located_tours()
            .await?
            .into_iter()
            .filter(|(_, point)| geo::central_angle(center, *point) <= radius)
            .map(|(doc, _)| doc)
            .collect();
        tracing::debug!(distance, %unit, results = docs.len(), "tours within radius");

        let docs = self.populate(docs, Populate::List).await?;
        Ok(docs.into_iter().map(|doc| self.output(doc)).collect())
    }

    /// Distance from `center` to every located tour, nearest first.
    pub async fn distances(&self, center: LatLng, unit: DistanceUnit) -> AppResult<Vec<Document>> {
        let mut rows: Vec<(f64, Document)> = self
            .located_tours()
            .await?
            .into_iter()
            .map(|(doc, point)| {
                let distance = geo::distance(center, point, unit);
                let mut row = Projection::Include(vec!["name".to_string()]).apply(doc);
                row.insert("distance".to_string(), number(distance));
                (distance, row)
            })
            .collect();
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    fn validate(&self, doc: &mut Document, mode: Mode, stored_price: Option<f64>) -> AppResult<()> {
        let mut v = Validator::new(mode);

        if v.require(doc, "name", "A tour must have a name")
            && let Some(name) = v.string(doc, "name")
        {
            let length = name.chars().count();
            v.check(
                length <= NAME_LENGTH.1,
                "A tour name must have less or equal then 40 characters",
            );
            v.check(
                length >= NAME_LENGTH.0,
                "A tour name must have more or equal then 10 characters",
            );
            doc.insert("slug".to_string(), Value::String(slugify(&name)));
        }

        v.require(doc, "duration", "A tour must have a duration");
        v.number(doc, "duration");
        v.require(doc, "maxGroupSize", "A tour must have a group size");
        v.number(doc, "maxGroupSize");
        v.require(doc, "difficulty", "A tour must have a difficulty");
        v.one_of(
            doc,
            "difficulty",
            &DIFFICULTIES,
            "Difficulty is either: easy, medium, difficult",
        );
        v.require(doc, "price", "A tour must have a price");
        let price = v.number(doc, "price").or(stored_price);
        if let Some(discount) = v.number(doc, "priceDiscount") {
            v.check(
                price.is_some_and(|p| discount < p),
                format!("Discount price ({discount}) should be below regular price"),
            );
        }
        v.require(doc, "imageCover", "A tour must have a cover image");
        v.string(doc, "imageCover");
        v.string(doc, "summary");
        v.string(doc, "description");
        v.boolean(doc, "secretTour");

        if let Some(value) = doc.get("images") {
            let all_strings = value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string));
            v.check(all_strings, "Invalid images: expected a list of strings");
        }
        if let Some(value) = doc.get("startDates") {
            // Stored in one UTC format so string ranges follow time order.
            let normalized: Option<Vec<Value>> = value.as_array().and_then(|items| {
                items
                    .iter()
                    .map(|d| d.as_str().and_then(document::normalize_timestamp).map(Value::String))
                    .collect()
            });
            match normalized {
                Some(dates) => {
                    doc.insert("startDates".to_string(), Value::Array(dates));
                }
                None => v.fail("Invalid startDates: expected a list of dates"),
            }
        }
        if let Some(guides) = doc.get("guides") {
            let normalized: Option<Vec<Value>> = guides.as_array().and_then(|items| {
                items
                    .iter()
                    .map(|g| g.as_str().and_then(document::normalize_id).map(Value::String))
                    .collect()
            });
            match normalized {
                Some(ids) => {
                    doc.insert("guides".to_string(), Value::Array(ids));
                }
                None => v.fail("Invalid guides: expected a list of user ids"),
            }
        }
        if let Some(Value::Object(location)) = doc.get_mut("startLocation") {
            location
                .entry("type")
                .or_insert_with(|| Value::String("Point".to_string()));
        }

        v.finish()
    }
}

#[async_trait]
impl Resource for TourService {
    fn label(&self) -> &'static str {
        "tour"
    }

    fn collection(&self) -> &Arc<dyn Collection> {
        &self.tours
    }

    /// Secret tours are hidden from every read.
    fn base_filter(&self) -> Filter {
        Filter::new().ne("secretTour", true)
    }

    async fn prepare_create(&self, mut input: Document) -> AppResult<Document> {
        let mut allowed = WRITABLE_FIELDS.to_vec();
        allowed.extend(["guides", ID_FIELD]);
        retain_fields(&mut input, &allowed);

        self.validate(&mut input, Mode::Create, None)?;

        default_field(&mut input, QUANTITY_FIELD, Value::from(0));
        default_field(&mut input, AVERAGE_FIELD, Value::from(NEUTRAL_AVERAGE));
        default_field(&mut input, "secretTour", Value::Bool(false));
        for list in ["images", "startDates", "locations", "guides"] {
            default_field(&mut input, list, Value::Array(Vec::new()));
        }
        Ok(input)
    }

    async fn prepare_update(&self, current: &Document, mut patch: Document) -> AppResult<Document> {
        let mut allowed = WRITABLE_FIELDS.to_vec();
        allowed.push("guides");
        retain_fields(&mut patch, &allowed);

        let stored_price = current.get("price").and_then(Value::as_f64);
        self.validate(&mut patch, Mode::Update, stored_price)?;
        Ok(patch)
    }

    async fn populate(&self, mut docs: Vec<Document>, mode: Populate) -> AppResult<Vec<Document>> {
        let guide_ids: Vec<String> = docs
            .iter()
            .flat_map(|doc| reference_ids(doc, "guides"))
            .collect();
        let guides = fetch_references(&self.users, guide_ids, active_filter(), &GUIDE_FIELDS).await?;

        for doc in &mut docs {
            if let Some(duration) = doc.get("duration").and_then(Value::as_f64) {
                doc.insert("durationWeeks".to_string(), Value::from(duration / 7.0));
            }
            embed_many(doc, "guides", &guides);
        }

        if mode == Populate::Detail {
            for doc in &mut docs {
                let Some(id) = document::id_of(doc).map(str::to_string) else {
                    continue;
                };
                let plan = QueryPlan {
                    sort: vec![SortKey::asc(document::CREATED_AT_FIELD)],
                    projection: Projection::without_version(),
                    ..QueryPlan::filtered(Filter::new().eq("tour", id))
                };
                let mut reviews = self.reviews.find(&plan).await?;

                let user_ids = reviews
                    .iter()
                    .flat_map(|r| reference_ids(r, "user"))
                    .collect();
                let users =
                    fetch_references(&self.users, user_ids, active_filter(), &REVIEW_USER_FIELDS)
                        .await?;
                for review in &mut reviews {
                    embed_one(review, "user", &users);
                }

                doc.insert(
                    "reviews".to_string(),
                    Value::Array(reviews.into_iter().map(Value::Object).collect()),
                );
            }
        }

        Ok(docs)
    }
}
