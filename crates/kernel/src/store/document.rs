//! Document representation and field-path helpers.
//!
//! Documents are schema-flexible JSON objects. Every stored document carries
//! an `id`, a `createdAt` timestamp and the internal `__v` version counter.
//! Field paths use dots to reach into nested objects (`startLocation.address`)
//! and numeric segments to index arrays (`startDates.0`).

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A stored record.
pub type Document = Map<String, Value>;

/// Identifier field present on every document.
pub const ID_FIELD: &str = "id";

/// Creation timestamp (RFC 3339, UTC, millisecond precision).
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Internal version/metadata field, hidden from default projections.
pub const VERSION_FIELD: &str = "__v";

/// Generate a new document identifier (UUIDv7, time-ordered).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Current time formatted the way documents store timestamps.
///
/// The fixed-width UTC format keeps lexical and chronological order equal,
/// which lets string range filters work on dates.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a date or date-time and format it the way documents store
/// timestamps.
///
/// Accepts RFC 3339, a bare `YYYY-MM-DDTHH:MM:SS[.fff]` (taken as UTC) and
/// `YYYY-MM-DD`. Years outside `1..=9999` are rejected since they break the
/// fixed-width format.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .or_else(|_| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN).and_utc())
        })
        .ok()?;
    (1..=9999)
        .contains(&parsed.year())
        .then(|| parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Normalize an identifier to the canonical hyphenated lowercase form.
///
/// Returns `None` when the value is not a UUID.
pub fn normalize_id(raw: &str) -> Option<String> {
    Uuid::parse_str(raw.trim()).ok().map(|id| id.to_string())
}

/// Get the document's identifier.
pub fn id_of(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Assign identity fields to a document about to be inserted.
///
/// A caller-supplied `id` is kept when it is a valid UUID (dev-data imports
/// rely on this to preserve references); otherwise a new one is generated.
pub fn stamp_new(doc: &mut Document) {
    let id = id_of(doc).and_then(normalize_id).unwrap_or_else(new_id);
    doc.insert(ID_FIELD.to_string(), Value::String(id));

    let has_created = doc
        .get(CREATED_AT_FIELD)
        .is_some_and(|v| v.as_str().is_some());
    if !has_created {
        doc.insert(
            CREATED_AT_FIELD.to_string(),
            Value::String(now_timestamp()),
        );
    }

    doc.insert(VERSION_FIELD.to_string(), Value::from(0));
}

/// Remove fields a patch may never overwrite.
pub fn strip_identity(patch: &mut Document) {
    patch.remove(ID_FIELD);
    patch.remove(CREATED_AT_FIELD);
    patch.remove(VERSION_FIELD);
}

/// Apply a shallow patch, bumping the version counter.
pub fn apply_patch(doc: &mut Document, mut patch: Document) {
    strip_identity(&mut patch);
    for (key, value) in patch {
        doc.insert(key, value);
    }
    let version = doc.get(VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0);
    doc.insert(VERSION_FIELD.to_string(), Value::from(version + 1));
}

/// Resolve a dotted path inside a document.
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a value at a dotted path, creating intermediate objects as needed.
///
/// Intermediate non-object values are replaced by objects.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut current = doc;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

/// Remove the value at a dotted path. Missing paths are ignored.
pub fn remove_path(doc: &mut Document, path: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut current = doc;
    for segment in segments {
        let Some(Value::Object(next)) = current.get_mut(segment) else {
            return;
        };
        current = next;
    }
    current.remove(last);
}
