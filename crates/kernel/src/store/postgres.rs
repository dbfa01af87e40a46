//! PostgreSQL JSONB collection.
//!
//! Each collection is a table `(id UUID PRIMARY KEY, data JSONB NOT NULL)`.
//! Read plans compile to SQL with sea-query; filter values are inlined as
//! escaped JSON literals and field paths are restricted to
//! `[A-Za-z0-9_.]` before they reach the query text.

use async_trait::async_trait;
use sea_query::{Alias, Expr, NullOrdering, Order, PostgresQueryBuilder, Query, SimpleExpr};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::document::{self, Document};
use super::{Collection, StoreError};
use crate::aggregate::{self, Pipeline};
use crate::db;
use crate::query::matcher::is_valid_field_path;
use crate::query::plan::{Condition, FilterClause, QueryPlan, SortDirection};

/// A collection backed by a JSONB table.
#[derive(Clone)]
pub struct PgCollection {
    pool: PgPool,
    table: String,
    /// Unique index name to the fields it covers.
    unique: Vec<(String, String)>,
}

impl PgCollection {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            unique: Vec::new(),
        }
    }

    /// Name the fields behind a unique index created by the migrations, so
    /// violations report fields rather than index names.
    pub fn with_unique_index(mut self, index: &str, fields: &[&str]) -> Self {
        self.unique.push((index.to_string(), fields.join(", ")));
        self
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<Document>, StoreError> {
        let rows: Vec<Value> = sqlx::query_scalar(sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(into_document).collect()
    }

    fn map_write_error(&self, err: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            let constraint = db_err.constraint().unwrap_or_default();
            let fields = self
                .unique
                .iter()
                .find(|(index, _)| index == constraint)
                .map_or_else(|| constraint.to_string(), |(_, fields)| fields.clone());
            return StoreError::Duplicate(fields);
        }
        StoreError::Database(err)
    }
}

fn into_document(value: Value) -> Result<Document, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Malformed(format!(
            "expected object, found {other}"
        ))),
    }
}

/// `data #> '{a,b}'` for the dotted path `a.b`.
///
/// Callers must validate the path first.
fn json_path(path: &str) -> String {
    format!("data #> '{{{}}}'", path.replace('.', ","))
}

/// Match the value itself or, for arrays, any element.
fn equals_template(path: &str, placeholder: usize) -> String {
    format!(
        "({path} = ${placeholder}::jsonb OR (jsonb_typeof({path}) = 'array' AND {path} @> jsonb_build_array(${placeholder}::jsonb)))"
    )
}

/// Compile one filter clause to a SQL condition.
pub(crate) fn clause_expr(clause: &FilterClause) -> SimpleExpr {
    if !is_valid_field_path(&clause.field) {
        tracing::debug!(field = %clause.field, "invalid field path; restricting results");
        return Expr::cust("FALSE");
    }
    let path = json_path(&clause.field);

    match &clause.condition {
        Condition::Equals(value) => {
            Expr::cust_with_values(equals_template(&path, 1), [value.to_string()])
        }
        Condition::NotEquals(value) => Expr::cust_with_values(
            format!("NOT COALESCE({}, FALSE)", equals_template(&path, 1)),
            [value.to_string()],
        ),
        Condition::In(values) => {
            if values.is_empty() {
                return Expr::cust("FALSE");
            }
            let alternatives: Vec<String> = (1..=values.len())
                .map(|n| equals_template(&path, n))
                .collect();
            Expr::cust_with_values(
                format!("({})", alternatives.join(" OR ")),
                values.iter().map(Value::to_string),
            )
        }
        Condition::Range(bounds) => {
            if bounds.is_empty() {
                return Expr::cust("TRUE");
            }
            let comparisons: Vec<String> = bounds
                .iter()
                .enumerate()
                .map(|(i, (op, _))| {
                    let n = i + 1;
                    format!(
                        "jsonb_typeof(e.value) = jsonb_typeof(${n}::jsonb) AND e.value {} ${n}::jsonb",
                        op.symbol()
                    )
                })
                .collect();
            Expr::cust_with_values(
                format!(
                    "EXISTS (SELECT 1 FROM jsonb_array_elements(CASE WHEN jsonb_typeof({path}) = 'array' THEN {path} ELSE jsonb_build_array({path}) END) AS e(value) WHERE {})",
                    comparisons.join(" AND ")
                ),
                bounds.iter().map(|(_, bound)| bound.to_string()),
            )
        }
    }
}

const BIGINT_MAX: u64 = i64::MAX as u64;

/// Compile a read plan to SQL. Projection is applied after fetching.
pub(crate) fn select_sql(table: &str, plan: &QueryPlan) -> String {
    let mut query = Query::select();
    query.column(Alias::new("data")).from(Alias::new(table));

    for clause in plan.filter.clauses() {
        query.and_where(clause_expr(clause));
    }

    for key in &plan.sort {
        if !is_valid_field_path(&key.field) {
            continue;
        }
        // Missing fields come first ascending and last descending.
        let (order, nulls) = match key.direction {
            SortDirection::Asc => (Order::Asc, NullOrdering::First),
            SortDirection::Desc => (Order::Desc, NullOrdering::Last),
        };
        query.order_by_expr_with_nulls(Expr::cust(json_path(&key.field)), order, nulls);
    }
    // Stable pagination across equal sort values.
    query.order_by(Alias::new("id"), Order::Asc);

    // LIMIT and OFFSET are bigint.
    if let Some(limit) = plan.limit {
        query.limit(limit.min(BIGINT_MAX));
    }
    if plan.skip > 0 {
        query.offset(plan.skip.min(BIGINT_MAX));
    }

    query.to_string(PostgresQueryBuilder)
}

#[async_trait]
impl Collection for PgCollection {
    fn name(&self) -> &str {
        &self.table
    }

    async fn find(&self, plan: &QueryPlan) -> Result<Vec<Document>, StoreError> {
        let sql = select_sql(&self.table, plan);
        let docs = self.fetch(&sql).await?;
        Ok(docs
            .into_iter()
            .map(|doc| plan.projection.apply(doc))
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let sql = format!("SELECT data FROM {} WHERE id = $1", self.table);
        let row: Option<Value> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_document).transpose()
    }

    async fn insert(&self, mut doc: Document) -> Result<Document, StoreError> {
        document::stamp_new(&mut doc);
        let id = document::id_of(&doc)
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| StoreError::Malformed("document id is not a UUID".to_string()))?;

        let sql = format!(
            "INSERT INTO {} (id, data) VALUES ($1, $2) RETURNING data",
            self.table
        );
        let stored: Value = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(Value::Object(doc))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_write_error(e))?;
        into_document(stored)
    }

    async fn update_by_id(
        &self,
        id: &str,
        mut patch: Document,
    ) -> Result<Option<Document>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        document::strip_identity(&mut patch);

        let sql = format!(
            "UPDATE {} SET data = data || $2 || jsonb_build_object('{}', COALESCE((data->>'{}')::bigint, 0) + 1) \
             WHERE id = $1 RETURNING data",
            self.table,
            document::VERSION_FIELD,
            document::VERSION_FIELD,
        );
        let row: Option<Value> = sqlx::query_scalar(&sql)
            .bind(id)
            .bind(Value::Object(patch))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_write_error(e))?;
        row.map(into_document).transpose()
    }

    async fn delete_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let sql = format!("DELETE FROM {} WHERE id = $1 RETURNING data", self.table);
        let row: Option<Value> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_document).transpose()
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {}", self.table);
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>, StoreError> {
        let (filter, rest) = pipeline.split_leading_match();
        let sql = select_sql(&self.table, &QueryPlan::filtered(filter));
        let docs = self.fetch(&sql).await?;
        Ok(aggregate::run_stages(rest, docs))
    }

    async fn ping(&self) -> bool {
        db::check_health(&self.pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::{Filter, Projection, RangeOp, SortKey};
    use serde_json::json;

    #[test]
    fn default_plan_selects_whole_table() {
        let sql = select_sql("tours", &QueryPlan::all());
        assert_eq!(sql, r#"SELECT "data" FROM "tours" ORDER BY "id" ASC"#);
    }

    #[test]
    fn equality_uses_jsonb_paths_and_inlined_literals() {
        let plan = QueryPlan::filtered(Filter::new().eq("startLocation.description", "Miami, USA"));
        let sql = select_sql("tours", &plan);

        assert!(
            sql.contains("data #> '{startLocation,description}'"),
            "should use a JSONB path: {sql}"
        );
        assert!(sql.contains("Miami, USA"), "should inline the value: {sql}");
        assert!(sql.contains("'::jsonb"), "should cast to jsonb: {sql}");
    }

    #[test]
    fn range_compares_same_json_type() {
        let plan = QueryPlan::filtered(Filter::new().range(
            "price",
            vec![(RangeOp::Gte, json!(100)), (RangeOp::Lt, json!(500))],
        ));
        let sql = select_sql("tours", &plan);

        assert!(sql.contains("jsonb_typeof(e.value) = jsonb_typeof('100'::jsonb)"), "{sql}");
        assert!(sql.contains("e.value >= '100'::jsonb"), "{sql}");
        assert!(sql.contains("e.value < '500'::jsonb"), "{sql}");
    }

    #[test]
    fn membership_and_inequality() {
        let mut filter = Filter::new().ne("secretTour", true);
        filter.push(FilterClause::new(
            "difficulty",
            Condition::In(vec![json!("easy"), json!("medium")]),
        ));
        let sql = select_sql("tours", &QueryPlan::filtered(filter));

        assert!(sql.contains("NOT COALESCE("), "{sql}");
        assert!(sql.contains("easy"), "{sql}");
        assert!(sql.contains("medium"), "{sql}");
        assert!(sql.contains(" OR "), "{sql}");
    }

    #[test]
    fn empty_membership_and_invalid_paths_restrict_results() {
        let mut filter = Filter::new().eq("price; DROP TABLE tours", 1);
        filter.push(FilterClause::new("difficulty", Condition::In(Vec::new())));
        let sql = select_sql("tours", &QueryPlan::filtered(filter));

        assert!(sql.contains("FALSE"), "{sql}");
        assert!(!sql.contains("DROP"), "{sql}");
    }

    #[test]
    fn sort_and_window() {
        let plan = QueryPlan {
            sort: vec![SortKey::desc("ratingsAverage"), SortKey::asc("price")],
            projection: Projection::without_version(),
            skip: 20,
            limit: Some(10),
            ..QueryPlan::default()
        };
        let sql = select_sql("tours", &plan);

        assert!(
            sql.contains(
                r#"ORDER BY data #> '{ratingsAverage}' DESC NULLS LAST, data #> '{price}' ASC NULLS FIRST, "id" ASC"#
            ),
            "{sql}"
        );
        assert!(sql.ends_with("LIMIT 10 OFFSET 20"), "{sql}");
    }

    #[test]
    fn huge_windows_stay_within_bigint() {
        let plan = QueryPlan {
            skip: u64::MAX,
            limit: Some(u64::MAX),
            ..QueryPlan::default()
        };
        let sql = select_sql("tours", &plan);
        let bound = i64::MAX;
        assert!(
            sql.ends_with(&format!("LIMIT {bound} OFFSET {bound}")),
            "{sql}"
        );
    }
}
