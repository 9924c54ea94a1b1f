//! Query types for the document cache
//!
//! Filters are a conjunction of per-field conditions (equality or `$in`
//! membership). Results can be sorted by one field and paginated with
//! skip/limit.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::types::{Result, WatchError};

/// A condition on a single field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value (a missing field equals `null`)
    Eq(JsonValue),
    /// Field equals any of the values
    In(Vec<JsonValue>),
}

impl Condition {
    /// Check a (possibly missing) field value against this condition
    pub fn matches(&self, value: Option<&JsonValue>) -> bool {
        let value = value.unwrap_or(&JsonValue::Null);
        match self {
            Condition::Eq(expected) => value == expected,
            Condition::In(options) => options.iter().any(|o| o == value),
        }
    }

    /// Values an index lookup has to probe for this condition
    pub fn candidates(&self) -> Vec<&JsonValue> {
        match self {
            Condition::Eq(v) => vec![v],
            Condition::In(values) => values.iter().collect(),
        }
    }
}

/// Conjunction of field conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Condition)>,
}

impl Filter {
    /// Empty filter (matches every document)
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.push((field.into(), Condition::Eq(value.into())));
        self
    }

    /// Require `field` to be one of `values`
    pub fn any_of<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<JsonValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.conditions.push((field.into(), Condition::In(values)));
        self
    }

    /// Parse a Mongo-style filter object: `{"a": 1, "b": {"$in": [..]}}`
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| WatchError::BadRequest("filter must be an object".into()))?;

        let mut filter = Filter::new();
        for (field, cond) in obj {
            match cond.as_object() {
                Some(ops) if ops.len() == 1 && ops.contains_key("$in") => {
                    let values = ops["$in"].as_array().ok_or_else(|| {
                        WatchError::BadRequest(format!("$in on '{}' must be an array", field))
                    })?;
                    filter = filter.any_of(field.clone(), values.iter().cloned());
                }
                Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    return Err(WatchError::BadRequest(format!(
                        "unsupported operator on '{}'",
                        field
                    )));
                }
                _ => filter = filter.eq(field.clone(), cond.clone()),
            }
        }
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Condition on a field, if any (first one wins)
    pub fn condition(&self, field: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, c)| c)
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(f, c)| (f.as_str(), c))
    }

    /// Check a document against every condition
    pub fn matches(&self, doc: &JsonValue) -> bool {
        self.conditions
            .iter()
            .all(|(field, cond)| cond.matches(lookup_field(doc, field)))
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sort by one field
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }

    /// Parse `field` (ascending) or `-field` (descending)
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        match spec.strip_prefix('-') {
            Some("") => None,
            Some(field) => Some(Self::descending(field)),
            None if spec.is_empty() => None,
            None => Some(Self::ascending(spec.trim_start_matches('+'))),
        }
    }
}

/// Sorting and pagination for a find
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<Sort>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result set of a find
///
/// Holds the current page of documents and the number of matches before
/// pagination was applied.
#[derive(Debug)]
pub struct Cursor {
    docs: std::vec::IntoIter<JsonValue>,
    total: usize,
}

impl Cursor {
    pub(crate) fn new(docs: Vec<JsonValue>, total: usize) -> Self {
        Self {
            docs: docs.into_iter(),
            total,
        }
    }

    /// Number of matching documents ignoring skip/limit
    pub fn total(&self) -> usize {
        self.total
    }

    /// Deserialize the remaining documents
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        self.docs
            .map(|doc| serde_json::from_value(doc).map_err(WatchError::from))
            .collect()
    }
}

impl Iterator for Cursor {
    type Item = JsonValue;

    fn next(&mut self) -> Option<Self::Item> {
        self.docs.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.docs.size_hint()
    }
}

/// Resolve a dotted field path (`a.b.c`) inside a document
pub fn lookup_field<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.').try_fold(doc, |current, segment| match current {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Total order over JSON values used for sorting
///
/// Missing/null < bool < number < string < array < object. Two strings that
/// both parse as RFC 3339 timestamps compare chronologically.
pub fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let a = a.unwrap_or(&JsonValue::Null);
    let b = b.unwrap_or(&JsonValue::Null);

    match (a, b) {
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (JsonValue::String(x), JsonValue::String(y)) => match (parse_time(x), parse_time(y)) {
            (Some(tx), Some(ty)) => tx.cmp(&ty),
            _ => x.cmp(y),
        },
        (JsonValue::Array(_), JsonValue::Array(_)) | (JsonValue::Object(_), JsonValue::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn parse_time(s: &str) -> Option<DateTime<FixedOffset>> {
    // Cheap pre-check so plain strings skip the parser
    if s.len() < 20 || s.as_bytes().get(4) != Some(&b'-') {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok()
}

fn type_rank(v: &JsonValue) -> u8 {
    match v {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

/// Apply sort, skip and limit to a set of matched documents
pub(crate) fn paginate(mut docs: Vec<JsonValue>, options: &FindOptions) -> Cursor {
    let total = docs.len();

    if let Some(ref sort) = options.sort {
        docs.sort_by(|a, b| {
            let ord = compare_values(lookup_field(a, &sort.field), lookup_field(b, &sort.field));
            let ord = match sort.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            // Tie-break on id so pages are stable
            ord.then_with(|| compare_values(a.get("_id"), b.get("_id")))
        });
    }

    let page: Vec<JsonValue> = docs
        .into_iter()
        .skip(options.skip)
        .take(options.limit.unwrap_or(usize::MAX))
        .collect();

    Cursor::new(page, total)
}
