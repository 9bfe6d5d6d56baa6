//! Reference query evaluation over a full document scan.
//!
//! Backends without a native query engine fall back to [`execute`]. Matching
//! is deliberately simple: free text is a case-insensitive substring search
//! over the serialized document, and structured keys compare against the
//! document top level and the metadata service's `main`,
//! `additionalInformation` and `curation` objects. Ordering only follows the
//! requested sort fields, there is no relevance score.

use std::cmp::Ordering;

use ddo_registry_common::ddo::{DidDocument, METADATA_SERVICE};
use ddo_registry_common::{DEFAULT_PAGE_SIZE, QueryRequest, TextQueryParams};
use serde_json::{Map, Value};

use crate::error::AppError;

const METADATA_SECTIONS: [&str; 3] = ["main", "additionalInformation", "curation"];

#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    All,
    Text(String),
    Fields(Map<String, Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryModel {
    pub filter: QueryFilter,
    pub sort: Vec<(String, SortOrder)>,
    /// Results per page, at least 1.
    pub page_size: usize,
    /// 1-based.
    pub page: usize,
}

#[derive(Debug, Clone)]
pub struct QueryHits {
    /// Documents on the requested page.
    pub hits: Vec<DidDocument>,
    /// Matches across all pages.
    pub total: usize,
}

impl QueryModel {
    pub fn new(filter: QueryFilter) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 1,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(QueryFilter::Text(text.into()))
    }

    pub fn paginate(mut self, offset: Option<usize>, page: Option<usize>) -> Self {
        self.page_size = offset.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        self.page = page.unwrap_or(1).max(1);
        self
    }

    /// `sort` maps field names to `1` (ascending) or `-1` (descending).
    pub fn with_sort(mut self, sort: &Map<String, Value>) -> Result<Self, AppError> {
        self.sort = sort
            .iter()
            .map(|(field, dir)| match dir.as_i64() {
                Some(1) => Ok((field.clone(), SortOrder::Asc)),
                Some(-1) => Ok((field.clone(), SortOrder::Desc)),
                _ => Err(AppError::Validation(format!(
                    "sort direction for '{field}' must be 1 or -1"
                ))),
            })
            .collect::<Result<_, _>>()?;
        Ok(self)
    }

    pub fn from_text_params(params: &TextQueryParams) -> Result<Self, AppError> {
        let filter = match params.text.as_deref() {
            Some(text) if !text.is_empty() => QueryFilter::Text(text.to_string()),
            _ => QueryFilter::All,
        };
        let mut model = Self::new(filter).paginate(params.offset, params.page);
        if let Some(sort) = params.sort.as_deref().filter(|s| !s.is_empty()) {
            let sort: Map<String, Value> = serde_json::from_str(sort)
                .map_err(|e| AppError::Validation(format!("sort must be a JSON object: {e}")))?;
            model = model.with_sort(&sort)?;
        }
        Ok(model)
    }

    pub fn from_request(request: &QueryRequest) -> Result<Self, AppError> {
        let filter = match &request.query {
            Some(fields) if !fields.is_empty() => QueryFilter::Fields(fields.clone()),
            _ => QueryFilter::All,
        };
        let model = Self::new(filter).paginate(request.offset, request.page);
        match &request.sort {
            Some(sort) => model.with_sort(sort),
            None => Ok(model),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub fn execute(docs: Vec<DidDocument>, model: &QueryModel) -> QueryHits {
    let mut matched: Vec<(Value, DidDocument)> = docs
        .into_iter()
        .filter_map(|doc| {
            let value = serde_json::to_value(&doc).ok()?;
            matches(&value, &model.filter).then_some((value, doc))
        })
        .collect();

    if !model.sort.is_empty() {
        matched.sort_by(|(a, _), (b, _)| {
            model
                .sort
                .iter()
                .map(|(field, order)| compare_field(lookup(a, field), lookup(b, field), *order))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }

    let total = matched.len();
    let skip = (model.page - 1).saturating_mul(model.page_size);
    let hits = matched
        .into_iter()
        .skip(skip)
        .take(model.page_size)
        .map(|(_, doc)| doc)
        .collect();

    QueryHits { hits, total }
}

fn matches(doc: &Value, filter: &QueryFilter) -> bool {
    match filter {
        QueryFilter::All => true,
        QueryFilter::Text(text) => text_matches(doc, &[text.as_str()]),
        QueryFilter::Fields(fields) => fields.iter().all(|(key, wanted)| field_matches(doc, key, wanted)),
    }
}

fn text_matches(doc: &Value, terms: &[&str]) -> bool {
    let haystack = doc.to_string().to_lowercase();
    terms
        .iter()
        .any(|term| haystack.contains(&term.to_lowercase()))
}

fn field_matches(doc: &Value, key: &str, wanted: &Value) -> bool {
    if key == "text" {
        let terms: Vec<&str> = match wanted {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => return false,
        };
        return text_matches(doc, &terms);
    }

    if key == "price"
        && let Some((min, max)) = numeric_range(wanted)
    {
        return lookup(doc, "price")
            .and_then(as_number)
            .is_some_and(|p| p >= min && p <= max);
    }

    let Some(actual) = lookup(doc, key) else {
        return false;
    };
    match wanted {
        Value::Array(options) => options.iter().any(|w| value_matches(actual, w)),
        _ => value_matches(actual, wanted),
    }
}

fn numeric_range(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [min, max] => Some((min.as_f64()?, max.as_f64()?)),
        _ => None,
    }
}

/// Numbers, or strings holding a decimal number (prices are strings).
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_matches(actual: &Value, wanted: &Value) -> bool {
    match (actual, wanted) {
        (Value::Array(items), _) => items.iter().any(|item| value_matches(item, wanted)),
        (Value::String(a), Value::String(w)) => a.eq_ignore_ascii_case(w),
        (Value::Number(a), Value::Number(w)) => a.as_f64() == w.as_f64(),
        _ => actual == wanted,
    }
}

/// Top-level key first, then the metadata service sections.
fn lookup<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(v) = doc.get(key) {
        return Some(v);
    }
    let attributes = doc
        .get("service")?
        .as_array()?
        .iter()
        .find(|s| s.get("type").and_then(Value::as_str) == Some(METADATA_SERVICE))?
        .get("attributes")?;
    METADATA_SECTIONS
        .iter()
        .find_map(|section| attributes.get(section)?.get(key))
}

fn compare_field(a: Option<&Value>, b: Option<&Value>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ord = compare_values(a, b);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
        // Documents lacking the field sort last either way.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
