//! Aggregation pipelines.
//!
//! A [`Pipeline`] is an ordered list of declarative stages evaluated over a
//! collection. Evaluation happens in process; the Postgres collection pushes
//! the leading `Match` stages into SQL first so only candidate rows are
//! loaded.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::{Number, Value};

use crate::query::matcher;
use crate::query::plan::{Filter, Projection, SortKey};
use crate::store::document::{self, Document};

/// Field carrying the group key in grouped output.
pub const GROUP_ID_FIELD: &str = "_id";

/// How documents are bucketed by a `Group` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// The value of a field.
    Field(String),
    /// The upper-cased string value of a field.
    Upper(String),
    /// The month (1-12) of a date-valued field.
    Month(String),
    /// A single bucket for every document (`_id` is null).
    Constant,
}

/// Per-group accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    Push(String),
}

/// A `Group` stage: a key and named accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    pub fields: Vec<(String, Accumulator)>,
}

impl Group {
    pub fn by(key: GroupKey) -> Self {
        Self {
            key,
            fields: Vec::new(),
        }
    }

    /// Add an output field computed by an accumulator.
    pub fn with(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.fields.push((name.into(), accumulator));
        self
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Unwind(String),
    Group(Group),
    Sort(Vec<SortKey>),
    Skip(u64),
    Limit(u64),
    Project(Projection),
}

/// An ordered aggregation pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, filter: Filter) -> Self {
        self.stages.push(Stage::Match(filter));
        self
    }

    pub fn unwind(mut self, path: impl Into<String>) -> Self {
        self.stages.push(Stage::Unwind(path.into()));
        self
    }

    pub fn group(mut self, group: Group) -> Self {
        self.stages.push(Stage::Group(group));
        self
    }

    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        self.stages.push(Stage::Sort(keys));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.stages.push(Stage::Skip(n));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.stages.push(Stage::Limit(n));
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.stages.push(Stage::Project(projection));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Combine the leading `Match` stages into one filter.
    ///
    /// Returns the combined filter and the stages that follow it.
    pub fn split_leading_match(&self) -> (Filter, &[Stage]) {
        let mut filter = Filter::new();
        let mut consumed = 0;
        for stage in &self.stages {
            let Stage::Match(next) = stage else {
                break;
            };
            filter = filter.and(next.clone());
            consumed += 1;
        }
        (filter, &self.stages[consumed..])
    }

    /// Evaluate the whole pipeline over a set of documents.
    pub fn run(&self, docs: Vec<Document>) -> Vec<Document> {
        run_stages(&self.stages, docs)
    }
}

/// Evaluate stages in order.
pub fn run_stages(stages: &[Stage], mut docs: Vec<Document>) -> Vec<Document> {
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => docs
                .into_iter()
                .filter(|doc| matcher::matches(filter, doc))
                .collect(),
            Stage::Unwind(path) => unwind(docs, path),
            Stage::Group(group) => run_group(group, docs),
            Stage::Sort(keys) => {
                matcher::sort_documents(&mut docs, keys);
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(to_usize(*n)).collect(),
            Stage::Limit(n) => docs.into_iter().take(to_usize(*n)).collect(),
            Stage::Project(projection) => {
                docs.into_iter().map(|doc| projection.apply(doc)).collect()
            }
        };
    }
    docs
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// One output document per array element. Missing or empty arrays drop the
/// document; scalar values pass through unchanged.
fn unwind(docs: Vec<Document>, path: &str) -> Vec<Document> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match document::get_path(&doc, path) {
            Some(Value::Array(items)) => {
                for item in items.clone() {
                    let mut copy = doc.clone();
                    document::set_path(&mut copy, path, item);
                    out.push(copy);
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => out.push(doc),
        }
    }
    out
}

#[derive(Debug)]
enum AccState {
    Count(u64),
    Sum(f64),
    Avg { total: f64, n: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Push(Vec<Value>),
}

impl AccState {
    fn new(accumulator: &Accumulator) -> Self {
        match accumulator {
            Accumulator::Count => Self::Count(0),
            Accumulator::Sum(_) => Self::Sum(0.0),
            Accumulator::Avg(_) => Self::Avg { total: 0.0, n: 0 },
            Accumulator::Min(_) => Self::Min(None),
            Accumulator::Max(_) => Self::Max(None),
            Accumulator::Push(_) => Self::Push(Vec::new()),
        }
    }

    fn feed(&mut self, accumulator: &Accumulator, doc: &Document) {
        let field = match accumulator {
            Accumulator::Count => None,
            Accumulator::Sum(f)
            | Accumulator::Avg(f)
            | Accumulator::Min(f)
            | Accumulator::Max(f)
            | Accumulator::Push(f) => document::get_path(doc, f),
        };
        let numeric = field.and_then(Value::as_f64);

        match self {
            Self::Count(n) => *n += 1,
            Self::Sum(total) => *total += numeric.unwrap_or(0.0),
            Self::Avg { total, n } => {
                if let Some(x) = numeric {
                    *total += x;
                    *n += 1;
                }
            }
            Self::Min(current) => keep_extreme(current, field, std::cmp::Ordering::Less),
            Self::Max(current) => keep_extreme(current, field, std::cmp::Ordering::Greater),
            Self::Push(values) => values.push(field.cloned().unwrap_or(Value::Null)),
        }
    }

    fn finish(self) -> Value {
        match self {
            Self::Count(n) => Value::from(n),
            Self::Sum(total) => number(total),
            Self::Avg { n: 0, .. } => Value::Null,
            Self::Avg { total, n } => number(total / n as f64),
            Self::Min(value) | Self::Max(value) => value.unwrap_or(Value::Null),
            Self::Push(values) => Value::Array(values),
        }
    }
}

fn keep_extreme(current: &mut Option<Value>, candidate: Option<&Value>, wanted: std::cmp::Ordering) {
    let Some(candidate) = candidate.filter(|v| !v.is_null()) else {
        return;
    };
    let replace = match current {
        None => true,
        Some(existing) => matcher::compare_values(Some(candidate), Some(existing)) == wanted,
    };
    if replace {
        *current = Some(candidate.clone());
    }
}

/// Render a float as a JSON number, integral values as integers.
pub fn number(x: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if x.fract() == 0.0 && x.abs() < MAX_EXACT {
        return Value::from(x as i64);
    }
    Number::from_f64(x).map_or(Value::Null, Value::Number)
}

fn group_key(key: &GroupKey, doc: &Document) -> Value {
    match key {
        GroupKey::Field(path) => document::get_path(doc, path).cloned().unwrap_or(Value::Null),
        GroupKey::Upper(path) => match document::get_path(doc, path) {
            Some(Value::String(s)) => Value::String(s.to_uppercase()),
            _ => Value::Null,
        },
        GroupKey::Month(path) => document::get_path(doc, path)
            .and_then(Value::as_str)
            .and_then(month_of)
            .map_or(Value::Null, Value::from),
        GroupKey::Constant => Value::Null,
    }
}

/// Month (1-12) of an RFC 3339 timestamp, naive datetime or plain date.
pub fn month_of(raw: &str) -> Option<u32> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.month());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.month());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.month())
}

fn run_group(group: &Group, docs: Vec<Document>) -> Vec<Document> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(Value, Vec<AccState>)> = Vec::new();

    for doc in &docs {
        let key = group_key(&group.key, doc);
        let slot = *index.entry(key.to_string()).or_insert_with(|| {
            let states = group.fields.iter().map(|(_, acc)| AccState::new(acc)).collect();
            buckets.push((key.clone(), states));
            buckets.len() - 1
        });
        let (_, states) = &mut buckets[slot];
        for ((_, accumulator), state) in group.fields.iter().zip(states.iter_mut()) {
            state.feed(accumulator, doc);
        }
    }

    buckets
        .into_iter()
        .map(|(key, states)| {
            let mut out = Document::new();
            out.insert(GROUP_ID_FIELD.to_string(), key);
            for ((name, _), state) in group.fields.iter().zip(states) {
                out.insert(name.clone(), state.finish());
            }
            out
        })
        .collect()
}
