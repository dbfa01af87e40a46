//! Query feature builder.
//!
//! Turns request query parameters into a read plan over a base [`Query`]:
//!
//! ```ignore
//! let query = QueryFeatures::new(Query::new(tours), &params)
//!     .filter()
//!     .sort()
//!     .limit_fields()
//!     .paginate()
//!     .into_query();
//! let docs = query.execute().await?;
//! ```
//!
//! Each stage reads the parameters independently and writes one axis of the
//! plan, so stages may be applied in any order. Building never touches the
//! store and never fails: unusable input degrades to defaults or to a
//! never-matching clause.

use std::collections::BTreeMap;

use serde_json::Value;

use super::params::{ParamValue, QueryParams};
use super::plan::{coerce, Condition, FilterClause, Projection, QueryPlan, RangeOp, SortKey};
use crate::store::Query;
use crate::store::document::CREATED_AT_FIELD;

/// Parameters that control the query itself and never become filters.
pub const RESERVED_KEYS: [&str; 4] = ["page", "sort", "limit", "fields"];

/// Page used when `page` is missing or unusable.
pub const DEFAULT_PAGE: u64 = 1;

/// Page size used when `limit` is missing or unusable.
pub const DEFAULT_LIMIT: u64 = 100;

/// Fluent, consuming builder over a base query.
#[derive(Debug)]
pub struct QueryFeatures {
    query: Query,
    params: QueryParams,
}

impl QueryFeatures {
    pub fn new(query: Query, params: &QueryParams) -> Self {
        Self {
            query,
            params: params.clone(),
        }
    }

    /// Apply every stage.
    pub fn all(self) -> Self {
        self.filter().sort().limit_fields().paginate()
    }

    /// Add a clause for every non-reserved parameter.
    pub fn filter(mut self) -> Self {
        let mut clauses = Vec::new();
        for (key, value) in self.params.iter() {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            collect_clauses(key, value, &mut clauses);
        }
        for clause in clauses {
            self.query.plan_mut().filter.push(clause);
        }
        self
    }

    /// Sort by `sort=a,-b`, defaulting to newest first.
    pub fn sort(mut self) -> Self {
        let keys: Vec<SortKey> = self
            .params
            .last("sort")
            .map(parse_sort)
            .unwrap_or_default();

        self.query.plan_mut().sort = if keys.is_empty() {
            vec![SortKey::desc(CREATED_AT_FIELD)]
        } else {
            keys
        };
        self
    }

    /// Select fields with `fields=a,b` or exclude them with `fields=-a,-b`.
    pub fn limit_fields(mut self) -> Self {
        let projection = self
            .params
            .last("fields")
            .map(parse_fields)
            .unwrap_or_else(Projection::without_version);
        self.query.plan_mut().projection = projection;
        self
    }

    /// Window the results with `page` and `limit`.
    pub fn paginate(mut self) -> Self {
        let page = positive(self.params.last("page")).unwrap_or(DEFAULT_PAGE);
        let limit = positive(self.params.last("limit")).unwrap_or(DEFAULT_LIMIT);

        let plan = self.query.plan_mut();
        plan.skip = (page - 1).saturating_mul(limit);
        plan.limit = Some(limit);
        self
    }

    /// The plan built so far.
    pub fn plan(&self) -> &QueryPlan {
        self.query.plan()
    }

    /// The configured, not-yet-executed query.
    pub fn into_query(self) -> Query {
        self.query
    }
}

fn positive(raw: Option<&str>) -> Option<u64> {
    raw?.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

fn parse_sort(raw: &str) -> Vec<SortKey> {
    raw.split(',')
        .map(str::trim)
        .filter_map(|segment| match segment.strip_prefix('-') {
            Some(field) if !field.trim().is_empty() => Some(SortKey::desc(field.trim())),
            Some(_) => None,
            None if segment.is_empty() => None,
            None => Some(SortKey::asc(segment)),
        })
        .collect()
}

fn parse_fields(raw: &str) -> Projection {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for segment in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match segment.strip_prefix('-') {
            Some(field) if !field.is_empty() => exclude.push(field.to_string()),
            Some(_) => {}
            None => include.push(segment.to_string()),
        }
    }

    if !include.is_empty() {
        Projection::Include(include)
    } else if !exclude.is_empty() {
        Projection::Exclude(exclude)
    } else {
        Projection::without_version()
    }
}

/// Values an equality parameter may stand for: the coerced value and, when
/// coercion changed its type, the raw string too (`01234` stays matchable
/// on a string field).
fn equality_candidates(raw: &str) -> Vec<Value> {
    match coerce(raw) {
        coerced @ Value::String(_) => vec![coerced],
        coerced => vec![coerced, Value::String(raw.to_string())],
    }
}

fn collect_clauses(path: &str, value: &ParamValue, out: &mut Vec<FilterClause>) {
    match value {
        ParamValue::Single(raw) => {
            let mut candidates = equality_candidates(raw);
            let condition = if candidates.len() == 1 {
                Condition::Equals(candidates.remove(0))
            } else {
                Condition::In(candidates)
            };
            out.push(FilterClause::new(path, condition));
        }
        ParamValue::Multi(raws) => {
            let values: Vec<Value> = raws.iter().flat_map(|r| equality_candidates(r)).collect();
            out.push(FilterClause::new(path, Condition::In(values)));
        }
        ParamValue::Nested(map) => collect_nested(path, map, out),
    }
}

/// Operator keys become range bounds on `path`; other keys extend the path.
fn collect_nested(path: &str, map: &BTreeMap<String, ParamValue>, out: &mut Vec<FilterClause>) {
    let mut bounds = Vec::new();
    for (key, value) in map {
        match (RangeOp::from_keyword(key), value) {
            (Some(op), ParamValue::Single(raw)) => bounds.push((op, coerce(raw))),
            (Some(op), ParamValue::Multi(raws)) => {
                bounds.extend(raws.iter().map(|raw| (op, coerce(raw))));
            }
            _ => collect_clauses(&format!("{path}.{key}"), value, out),
        }
    }
    if !bounds.is_empty() {
        out.push(FilterClause::new(path, Condition::Range(bounds)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::SortDirection;
    use crate::store::MemoryCollection;
    use serde_json::json;
    use std::sync::Arc;

    fn features(query: &str) -> QueryFeatures {
        let collection = Arc::new(MemoryCollection::new("tours"));
        QueryFeatures::new(Query::new(collection), &QueryParams::parse(query))
    }

    #[test]
    fn reserved_keys_never_filter() {
        let f = features("page=2&sort=price&limit=5&fields=name").filter();
        assert!(f.plan().filter.is_empty());
    }

    #[test]
    fn plain_values_are_coerced_equality_keeping_the_raw_string() {
        let f = features("difficulty=easy&duration=5&secretTour=false").filter();
        let filter = &f.plan().filter;

        assert_eq!(
            filter.condition_for("difficulty"),
            Some(&Condition::Equals(json!("easy")))
        );
        assert_eq!(
            filter.condition_for("duration"),
            Some(&Condition::In(vec![json!(5), json!("5")]))
        );
        assert_eq!(
            filter.condition_for("secretTour"),
            Some(&Condition::In(vec![json!(false), json!("false")]))
        );
    }

    #[test]
    fn repeated_numeric_values_keep_their_raw_form() {
        let f = features("summary=01234&summary=easy").filter();
        assert_eq!(
            f.plan().filter.condition_for("summary"),
            Some(&Condition::In(vec![json!(1234), json!("01234"), json!("easy")]))
        );
    }

    #[test]
    fn operators_become_ranges() {
        let f = features("duration[gte]=5&price[lt]=1500&price[gt]=100").filter();
        let filter = &f.plan().filter;

        assert_eq!(
            filter.condition_for("duration"),
            Some(&Condition::Range(vec![(RangeOp::Gte, json!(5))]))
        );
        let Some(Condition::Range(price)) = filter.condition_for("price") else {
            panic!("expected a price range");
        };
        assert!(price.contains(&(RangeOp::Lt, json!(1500))));
        assert!(price.contains(&(RangeOp::Gt, json!(100))));
    }

    #[test]
    fn only_whole_operator_keys_are_recognised() {
        let f = features("price[gtex]=5&ingtest=lt").filter();
        let filter = &f.plan().filter;

        assert_eq!(
            filter.condition_for("price.gtex"),
            Some(&Condition::In(vec![json!(5), json!("5")]))
        );
        assert_eq!(
            filter.condition_for("ingtest"),
            Some(&Condition::Equals(json!("lt")))
        );
    }

    #[test]
    fn nested_fields_and_ranges_mix() {
        let f = features("startLocation[coordinates][gte]=10&price[currency]=usd").filter();
        let filter = &f.plan().filter;

        assert_eq!(
            filter.condition_for("startLocation.coordinates"),
            Some(&Condition::Range(vec![(RangeOp::Gte, json!(10))]))
        );
        assert_eq!(
            filter.condition_for("price.currency"),
            Some(&Condition::Equals(json!("usd")))
        );
    }

    #[test]
    fn repeated_keys_become_membership() {
        let f = features("difficulty=easy&difficulty=medium").filter();
        assert_eq!(
            f.plan().filter.condition_for("difficulty"),
            Some(&Condition::In(vec![json!("easy"), json!("medium")]))
        );
    }

    #[test]
    fn sort_parsing() {
        let f = features("sort=price,-ratingsAverage,,%20").sort();
        assert_eq!(
            f.plan().sort,
            vec![SortKey::asc("price"), SortKey::desc("ratingsAverage")]
        );

        let f = features("sort=%20,").sort();
        assert_eq!(f.plan().sort, vec![SortKey::desc("createdAt")]);

        let f = features("sort=name&sort=-price").sort();
        assert_eq!(f.plan().sort[0].direction, SortDirection::Desc);
    }

    #[test]
    fn field_selection() {
        let f = features("fields=name,duration").limit_fields();
        assert_eq!(
            f.plan().projection,
            Projection::Include(vec!["name".into(), "duration".into()])
        );

        let f = features("fields=-name,-duration").limit_fields();
        assert_eq!(
            f.plan().projection,
            Projection::Exclude(vec!["name".into(), "duration".into()])
        );

        let f = features("fields=name,-duration").limit_fields();
        assert_eq!(f.plan().projection, Projection::Include(vec!["name".into()]));

        let f = features("").limit_fields();
        assert_eq!(f.plan().projection, Projection::without_version());
    }

    #[test]
    fn pagination_defaults_and_fallbacks() {
        let plan = features("page=3&limit=10").paginate().into_query();
        assert_eq!(plan.plan().skip, 20);
        assert_eq!(plan.plan().limit, Some(10));

        for raw in ["", "page=0&limit=0", "page=abc&limit=-5"] {
            let f = features(raw).paginate();
            assert_eq!(f.plan().skip, 0, "{raw}");
            assert_eq!(f.plan().limit, Some(DEFAULT_LIMIT), "{raw}");
        }
    }

    #[test]
    fn stages_are_order_insensitive() {
        let q = "difficulty=easy&sort=-price&fields=name&page=2&limit=3";
        let a = features(q).filter().sort().limit_fields().paginate();
        let b = features(q).paginate().limit_fields().sort().filter();
        assert_eq!(a.plan(), b.plan());
    }

    #[test]
    fn clauses_extend_the_base_filter() {
        let collection = Arc::new(MemoryCollection::new("reviews"));
        let base = Query::filtered(
            collection,
            crate::query::plan::Filter::new().eq("tour", "t1"),
        );
        let f = QueryFeatures::new(base, &QueryParams::parse("rating=5")).filter();
        assert_eq!(f.plan().filter.clauses().len(), 2);
    }
}
