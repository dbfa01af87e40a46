//! Raw query parameters.
//!
//! Parses a URL query string into a string-keyed mapping. Bracket syntax
//! nests values (`duration[gte]=5` becomes `{duration: {gte: "5"}}`) and
//! repeated keys collect into lists.

use std::collections::BTreeMap;

/// Deepest bracket nesting honoured; anything beyond stays a literal key.
const MAX_DEPTH: usize = 5;

/// A single raw parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Single(String),
    Multi(Vec<String>),
    Nested(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    /// The last plain value, if this is not a nested mapping.
    pub fn last(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            Self::Multi(values) => values.last().map(String::as_str),
            Self::Nested(_) => None,
        }
    }
}

/// Parsed query parameters for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<String, ParamValue>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw (still percent-encoded) query string.
    pub fn parse(query: &str) -> Self {
        Self::from_pairs(url::form_urlencoded::parse(query.as_bytes()))
    }

    /// Build from already-decoded key/value pairs, in order.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (key, value) in pairs {
            let segments = split_key(key.as_ref());
            if segments.is_empty() {
                continue;
            }
            insert_at(&mut params.0, &segments, value.into());
        }
        params
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// Last plain value for a key. Repeated keys resolve to the final one.
    pub fn last(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(ParamValue::last)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ParamValue) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Split `a[b][c]` into `["a", "b", "c"]`.
///
/// Empty brackets (`a[]`) append to a list, so they are dropped here.
/// Unbalanced brackets leave the key as a literal.
fn split_key(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return if key.is_empty() {
            Vec::new()
        } else {
            vec![key.to_string()]
        };
    };
    if open == 0 {
        return vec![key.to_string()];
    }

    let mut segments = vec![key[..open].to_string()];
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        if segments.len() > MAX_DEPTH {
            segments.push(rest.to_string());
            return segments;
        }
        let Some(close) = stripped.find(']') else {
            return vec![key.to_string()];
        };
        let segment = &stripped[..close];
        if !segment.is_empty() {
            segments.push(segment.to_string());
        }
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return vec![key.to_string()];
    }
    segments
}

fn insert_at(map: &mut BTreeMap<String, ParamValue>, segments: &[String], value: String) {
    let Some((head, tail)) = segments.split_first() else {
        return;
    };

    if tail.is_empty() {
        let merged = match map.remove(head) {
            None | Some(ParamValue::Nested(_)) => ParamValue::Single(value),
            Some(ParamValue::Single(previous)) => ParamValue::Multi(vec![previous, value]),
            Some(ParamValue::Multi(mut values)) => {
                values.push(value);
                ParamValue::Multi(values)
            }
        };
        map.insert(head.clone(), merged);
        return;
    }

    let entry = map
        .entry(head.clone())
        .or_insert_with(|| ParamValue::Nested(BTreeMap::new()));
    if !matches!(entry, ParamValue::Nested(_)) {
        *entry = ParamValue::Nested(BTreeMap::new());
    }
    if let ParamValue::Nested(inner) = entry {
        insert_at(inner, tail, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_pairs() {
        let params = QueryParams::parse("difficulty=easy&page=2");
        assert_eq!(params.last("difficulty"), Some("easy"));
        assert_eq!(params.last("page"), Some("2"));
        assert_eq!(params.last("missing"), None);
    }

    #[test]
    fn bracket_syntax_nests() {
        let params = QueryParams::parse("duration%5Bgte%5D=5&price[lt]=1500&price[gt]=10");

        let Some(ParamValue::Nested(duration)) = params.get("duration") else {
            panic!("expected nested duration");
        };
        assert_eq!(duration.get("gte"), Some(&ParamValue::Single("5".into())));

        let Some(ParamValue::Nested(price)) = params.get("price") else {
            panic!("expected nested price");
        };
        assert_eq!(price.len(), 2);
    }

    #[test]
    fn repeated_keys_collect() {
        let params = QueryParams::parse("difficulty=easy&difficulty=medium&sort=price&sort=-name");
        assert_eq!(
            params.get("difficulty"),
            Some(&ParamValue::Multi(vec!["easy".into(), "medium".into()]))
        );
        assert_eq!(params.last("sort"), Some("-name"));
    }

    #[test]
    fn empty_brackets_append() {
        let params = QueryParams::parse("guides[]=a&guides[]=b");
        assert_eq!(
            params.get("guides"),
            Some(&ParamValue::Multi(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn malformed_brackets_stay_literal() {
        let params = QueryParams::parse("price[gte=5&[x]=1&a[b]c=2");
        assert_eq!(params.last("price[gte"), Some("5"));
        assert_eq!(params.last("[x]"), Some("1"));
        assert_eq!(params.last("a[b]c"), Some("2"));
    }

    #[test]
    fn deep_nesting_is_capped() {
        let params = QueryParams::parse("a[b][c][d][e][f][g]=1");
        let mut current = params.get("a");
        let mut depth = 0;
        while let Some(ParamValue::Nested(map)) = current {
            depth += 1;
            current = map.values().next();
        }
        assert_eq!(depth, MAX_DEPTH + 1);
        assert_eq!(current, Some(&ParamValue::Single("1".into())));
    }

    #[test]
    fn plus_decodes_to_space() {
        let params = QueryParams::parse("name=The+Forest+Hiker");
        assert_eq!(params.last("name"), Some("The Forest Hiker"));
    }
}
