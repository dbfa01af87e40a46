//! Query plan types.
//!
//! A [`QueryPlan`] is the structured, storage-agnostic description of a
//! collection read: which documents (filter), in what order (sort), which
//! fields (projection) and which window (skip/limit). Backends compile it
//! into their native form.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use crate::store::document::{self, Document, ID_FIELD, VERSION_FIELD};

/// Range comparison operators accepted in query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RangeOp {
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl RangeOp {
    /// Recognize an operator keyword. Only whole keywords match.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }

    /// The keyword as it appears in query parameters.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    /// SQL comparison symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Whether `value.cmp(bound)` satisfies this operator.
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for RangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.keyword())
    }
}

/// Condition applied to a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value (or an array field contains it).
    Equals(Value),
    /// Field is missing or differs from the value.
    NotEquals(Value),
    /// Field equals any of the values.
    In(Vec<Value>),
    /// Field satisfies every comparison.
    Range(Vec<(RangeOp, Value)>),
}

/// A condition bound to a field path.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    /// Dotted field path.
    pub field: String,

    /// Condition to satisfy.
    pub condition: Condition,
}

impl FilterClause {
    pub fn new(field: impl Into<String>, condition: Condition) -> Self {
        Self {
            field: field.into(),
            condition,
        }
    }
}

/// Conjunction of filter clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<FilterClause>,
}

impl Filter {
    /// An empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality clause.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses
            .push(FilterClause::new(field, Condition::Equals(value.into())));
        self
    }

    /// Add an inequality clause.
    pub fn ne(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses
            .push(FilterClause::new(field, Condition::NotEquals(value.into())));
        self
    }

    /// Add a range clause.
    pub fn range(mut self, field: impl Into<String>, bounds: Vec<(RangeOp, Value)>) -> Self {
        self.clauses
            .push(FilterClause::new(field, Condition::Range(bounds)));
        self
    }

    /// Add an arbitrary clause.
    pub fn push(&mut self, clause: FilterClause) {
        self.clauses.push(clause);
    }

    /// Combine two filters (logical AND).
    pub fn and(mut self, other: Filter) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// First condition on a field, if any.
    pub fn condition_for(&self, field: &str) -> Option<&Condition> {
        self.clauses
            .iter()
            .find(|c| c.field == field)
            .map(|c| &c.condition)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key; earlier keys take priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Which fields a read returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    /// Every field.
    #[default]
    All,
    /// Only these fields (plus `id`).
    Include(Vec<String>),
    /// Every field except these.
    Exclude(Vec<String>),
}

impl Projection {
    /// The default projection for API reads: everything but `__v`.
    pub fn without_version() -> Self {
        Self::Exclude(vec![VERSION_FIELD.to_string()])
    }

    /// Shape a document according to this projection.
    pub fn apply(&self, doc: Document) -> Document {
        match self {
            Self::All => doc,
            Self::Include(fields) => {
                let mut shaped = Document::new();
                if let Some(id) = doc.get(ID_FIELD) {
                    shaped.insert(ID_FIELD.to_string(), id.clone());
                }
                for field in fields {
                    if let Some(value) = document::get_path(&doc, field) {
                        document::set_path(&mut shaped, field, value.clone());
                    }
                }
                shaped
            }
            Self::Exclude(fields) => {
                let mut shaped = doc;
                for field in fields {
                    document::remove_path(&mut shaped, field);
                }
                shaped
            }
        }
    }
}

/// A complete, not-yet-executed read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl QueryPlan {
    /// Read everything, unsorted, unprojected.
    pub fn all() -> Self {
        Self::default()
    }

    /// Read the documents matching a filter.
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

/// Coerce a raw query-string value into a typed JSON value.
///
/// Integers and decimals become numbers, `true`/`false` become booleans,
/// anything else stays a string.
pub fn coerce(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>()
        && float.is_finite()
        && trimmed.chars().any(|c| c.is_ascii_digit())
    {
        return Value::from(float);
    }
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
