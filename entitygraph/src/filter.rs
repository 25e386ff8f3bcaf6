//! Filter DSL (spec §4.5 `find`/`find-iter`).
//!
//! Grounded in the teacher's `filters/normalizers.rs` per-field-type builder
//! functions (`normalizers::exact`, `::contains`, ...). `Modifier::to_wire`
//! keeps that same per-modifier-builder shape but targets a remote filter
//! argument (`find_remote`/`find_iter_remote`) instead of a Redis-search
//! query string, since the spec requires `find`/`find-iter` to ask the
//! remote service rather than scan an already-materialized collection. The
//! local, in-memory `find`/`find_iter` below remain for candidates already
//! held in the store (e.g. evaluating a predicate against cached results).

use futures_util::stream::{self, Stream, StreamExt};
use regex::Regex;
use serde_json::{json, Value as JsonValue};

use crate::entity::{Entity, EntityFields};
use crate::error::GraphResult;
use crate::schema::EntityMetadata;
use crate::store::Store;
use crate::transport::Transport;

/// The reduced value a single field contributes to filter evaluation.
/// Mirrors the shapes `SnapshotValue` already tracks, so a derive-generated
/// accessor can usually just forward a tracked field's current value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperand {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    TextList(Vec<String>),
}

/// One comparison a [`Criterion`] may apply to a [`FilterOperand`].
#[derive(Debug, Clone)]
pub enum Modifier {
    Exact(FilterOperand),
    Contains(String),
    Regex(Regex),
    GreaterThan(f64),
    GreaterThanOrEqual(f64),
    LessThan(f64),
    LessThanOrEqual(f64),
    Between(f64, f64),
    IsNull,
    IsNotNull,
    /// Matches if the operand's text (or any item of a text list) equals
    /// one of `values` (the "IN" modifier).
    In(Vec<String>),
    /// List-valued fields only: matches if `value` is a member of the list
    /// (the teacher's `INCLUDES` modifier).
    Includes(String),
}

pub fn exact(value: impl Into<FilterOperand>) -> Modifier {
    Modifier::Exact(value.into())
}

pub fn contains(needle: impl Into<String>) -> Modifier {
    Modifier::Contains(needle.into())
}

pub fn matches_regex(pattern: &str) -> Result<Modifier, regex::Error> {
    Ok(Modifier::Regex(Regex::new(pattern)?))
}

pub fn gt(value: f64) -> Modifier {
    Modifier::GreaterThan(value)
}

pub fn gte(value: f64) -> Modifier {
    Modifier::GreaterThanOrEqual(value)
}

pub fn lt(value: f64) -> Modifier {
    Modifier::LessThan(value)
}

pub fn lte(value: f64) -> Modifier {
    Modifier::LessThanOrEqual(value)
}

pub fn between(low: f64, high: f64) -> Modifier {
    Modifier::Between(low, high)
}

pub fn is_null() -> Modifier {
    Modifier::IsNull
}

pub fn is_not_null() -> Modifier {
    Modifier::IsNotNull
}

pub fn is_in(values: impl IntoIterator<Item = impl Into<String>>) -> Modifier {
    Modifier::In(values.into_iter().map(Into::into).collect())
}

pub fn includes(value: impl Into<String>) -> Modifier {
    Modifier::Includes(value.into())
}

impl From<&str> for FilterOperand {
    fn from(s: &str) -> Self {
        FilterOperand::Text(s.to_string())
    }
}

impl From<String> for FilterOperand {
    fn from(s: String) -> Self {
        FilterOperand::Text(s)
    }
}

impl From<f64> for FilterOperand {
    fn from(n: f64) -> Self {
        FilterOperand::Number(n)
    }
}

impl From<bool> for FilterOperand {
    fn from(b: bool) -> Self {
        FilterOperand::Bool(b)
    }
}

fn operand_to_wire(operand: &FilterOperand) -> JsonValue {
    match operand {
        FilterOperand::Null => JsonValue::Null,
        FilterOperand::Text(s) => json!(s),
        FilterOperand::Number(n) => json!(n),
        FilterOperand::Bool(b) => json!(b),
        FilterOperand::TextList(items) => json!(items),
    }
}

impl Modifier {
    /// Renders this modifier the way a remote filter argument expects it,
    /// one builder per modifier kind — the same shape as the teacher's
    /// `normalizers::*` functions, retargeted from a query string to a JSON
    /// filter fragment.
    fn to_wire(&self) -> JsonValue {
        match self {
            Modifier::Exact(operand) => json!({ "eq": operand_to_wire(operand) }),
            Modifier::Contains(needle) => json!({ "contains": needle }),
            Modifier::Regex(pattern) => json!({ "regex": pattern.as_str() }),
            Modifier::GreaterThan(bound) => json!({ "gt": bound }),
            Modifier::GreaterThanOrEqual(bound) => json!({ "gte": bound }),
            Modifier::LessThan(bound) => json!({ "lt": bound }),
            Modifier::LessThanOrEqual(bound) => json!({ "lte": bound }),
            Modifier::Between(low, high) => json!({ "gte": low, "lte": high }),
            Modifier::IsNull => json!({ "isNull": true }),
            Modifier::IsNotNull => json!({ "isNull": false }),
            Modifier::In(values) => json!({ "in": values }),
            Modifier::Includes(value) => json!({ "includes": value }),
        }
    }

    pub fn matches(&self, operand: &FilterOperand) -> bool {
        match (self, operand) {
            (Modifier::IsNull, FilterOperand::Null) => true,
            (Modifier::IsNull, _) => false,
            (Modifier::IsNotNull, FilterOperand::Null) => false,
            (Modifier::IsNotNull, _) => true,
            (Modifier::Exact(expected), actual) => expected == actual,
            (Modifier::Contains(needle), FilterOperand::Text(text)) => text.contains(needle.as_str()),
            (Modifier::Contains(needle), FilterOperand::TextList(items)) => {
                items.iter().any(|item| item.contains(needle.as_str()))
            }
            (Modifier::Regex(pattern), FilterOperand::Text(text)) => pattern.is_match(text),
            (Modifier::GreaterThan(bound), FilterOperand::Number(n)) => n > bound,
            (Modifier::GreaterThanOrEqual(bound), FilterOperand::Number(n)) => n >= bound,
            (Modifier::LessThan(bound), FilterOperand::Number(n)) => n < bound,
            (Modifier::LessThanOrEqual(bound), FilterOperand::Number(n)) => n <= bound,
            (Modifier::Between(low, high), FilterOperand::Number(n)) => n >= low && n <= high,
            (Modifier::In(values), FilterOperand::Text(text)) => values.iter().any(|v| v == text),
            (Modifier::In(values), FilterOperand::TextList(items)) => {
                items.iter().any(|item| values.contains(item))
            }
            (Modifier::Includes(value), FilterOperand::TextList(items)) => items.contains(value),
            _ => false,
        }
    }
}

/// One field-level condition: how to extract the operand from a candidate,
/// and what it must match.
pub struct Criterion<T> {
    pub field: &'static str,
    extractor: Box<dyn Fn(&T) -> FilterOperand + Send + Sync>,
    modifier: Modifier,
}

impl<T> Criterion<T> {
    pub fn new(
        field: &'static str,
        extractor: impl Fn(&T) -> FilterOperand + Send + Sync + 'static,
        modifier: Modifier,
    ) -> Self {
        Criterion {
            field,
            extractor: Box::new(extractor),
            modifier,
        }
    }

    fn matches(&self, candidate: &T) -> bool {
        self.modifier.matches(&(self.extractor)(candidate))
    }

    /// This criterion's wire fragment, for assembling a remote filter
    /// argument (`find_remote`/`find_iter_remote`).
    pub fn wire_fragment(&self) -> JsonValue {
        json!({ "field": self.field, "modifier": self.modifier.to_wire() })
    }
}

/// Evaluates every criterion against `candidate`, all must match (logical
/// AND, consistent with the teacher's multi-field query composition).
pub fn matches_all<T>(criteria: &[Criterion<T>], candidate: &T) -> bool {
    criteria.iter().all(|c| c.matches(candidate))
}

/// Eagerly filters `items` against every criterion.
pub fn find<T>(items: Vec<T>, criteria: &[Criterion<T>]) -> Vec<T> {
    items.into_iter().filter(|item| matches_all(criteria, item)).collect()
}

/// Lazily filters `items`, yielding matches as a stream (spec §4.5
/// `find-iter`), useful for paginated upstream sources the caller feeds in
/// incrementally rather than materializing eagerly.
pub fn find_iter<'a, T: 'a>(
    items: impl Stream<Item = T> + 'a,
    criteria: &'a [Criterion<T>],
) -> impl Stream<Item = T> + 'a {
    items.filter(move |item| {
        let matched = matches_all(criteria, item);
        async move { matched }
    })
}

/// Convenience for feeding an already-materialized `Vec<T>` into `find_iter`.
pub fn find_iter_from_vec<'a, T: 'a>(items: Vec<T>, criteria: &'a [Criterion<T>]) -> impl Stream<Item = T> + 'a {
    find_iter(stream::iter(items), criteria)
}

/// State for a page-numbered remote fetch: either "fetch this page next" or
/// "no further pages".
enum Paging {
    Next(u64),
    Done,
}

async fn fetch_page<T>(
    transport: &dyn Transport,
    operation: &str,
    criteria: &[Criterion<T>],
    page_size: usize,
    page: u64,
) -> GraphResult<(JsonValue, Paging)> {
    let filter: Vec<JsonValue> = criteria.iter().map(Criterion::wire_fragment).collect();
    let variables = json!({ "filter": filter, "page": page, "page_size": page_size });
    let response = transport.execute(operation, variables).await?;
    let has_more = response.get("has_more").and_then(JsonValue::as_bool).unwrap_or(false);
    let next = if has_more { Paging::Next(page + 1) } else { Paging::Done };
    Ok((response, next))
}

/// Transport-backed `find` (spec §4.5): translates `criteria` into a remote
/// filter query (`QueryStrategy::FilterQuery`'s wire shape) instead of
/// scanning an already-materialized collection, and walks the remote result
/// set page by page (`page`/`page_size`/`has_more`, the teacher's
/// `SearchPage` shape) so a broad filter never forces the remote service to
/// answer with its entire collection in one response.
pub async fn find_remote<T>(
    transport: &dyn Transport,
    operation: &str,
    criteria: &[Criterion<T>],
    store: &Store,
    page_size: usize,
) -> GraphResult<Vec<Entity<T>>>
where
    T: EntityFields + EntityMetadata,
{
    let page_size = page_size.max(1);
    let mut out = Vec::new();
    let mut paging = Paging::Next(1);
    loop {
        let page = match paging {
            Paging::Done => break,
            Paging::Next(page) => page,
        };
        let (response, next) = fetch_page(transport, operation, criteria, page_size, page).await?;
        let items = response.get("items").and_then(JsonValue::as_array).cloned().unwrap_or_default();
        for item in items {
            out.push(store.materialize::<T>(item)?);
        }
        paging = next;
    }
    Ok(out)
}

/// Lazy, transport-backed `find-iter` (spec §4.5): yields matches page by
/// page rather than collecting the whole remote result set up front.
pub fn find_iter_remote<'a, T>(
    transport: &'a dyn Transport,
    operation: &'a str,
    criteria: &'a [Criterion<T>],
    store: &'a Store,
    page_size: usize,
) -> impl Stream<Item = GraphResult<Entity<T>>> + 'a
where
    T: EntityFields + EntityMetadata + 'a,
{
    let page_size = page_size.max(1);
    stream::unfold(Paging::Next(1), move |paging| async move {
        let page_number = match paging {
            Paging::Done => return None,
            Paging::Next(page_number) => page_number,
        };
        match fetch_page(transport, operation, criteria, page_size, page_number).await {
            Ok((response, next)) => {
                let items = response.get("items").and_then(JsonValue::as_array).cloned().unwrap_or_default();
                let page: Vec<GraphResult<Entity<T>>> = items.into_iter().map(|item| store.materialize::<T>(item)).collect();
                Some((stream::iter(page), next))
            }
            Err(err) => Some((stream::iter(vec![Err(err)]), Paging::Done)),
        }
    })
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        title: String,
        rating: f64,
        tags: Vec<String>,
    }

    fn title_criterion(modifier: Modifier) -> Criterion<Row> {
        Criterion::new("title", |r: &Row| FilterOperand::Text(r.title.clone()), modifier)
    }

    fn rating_criterion(modifier: Modifier) -> Criterion<Row> {
        Criterion::new("rating", |r: &Row| FilterOperand::Number(r.rating), modifier)
    }

    fn tags_criterion(modifier: Modifier) -> Criterion<Row> {
        Criterion::new("tags", |r: &Row| FilterOperand::TextList(r.tags.clone()), modifier)
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { title: "Alpha".into(), rating: 90.0, tags: vec!["a".into(), "b".into()] },
            Row { title: "Beta".into(), rating: 40.0, tags: vec!["b".into()] },
            Row { title: "Gamma".into(), rating: 70.0, tags: vec!["c".into()] },
        ]
    }

    #[test]
    fn exact_matches_single_row() {
        let result = find(rows(), &[title_criterion(exact("Beta"))]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].title, "Beta");
    }

    #[test]
    fn gte_filters_by_threshold() {
        let result = find(rows(), &[rating_criterion(gte(70.0))]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn between_is_inclusive() {
        let result = find(rows(), &[rating_criterion(between(40.0, 70.0))]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn includes_matches_list_membership() {
        let result = find(rows(), &[tags_criterion(includes("b"))]);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn multiple_criteria_combine_with_and() {
        let result = find(rows(), &[rating_criterion(gte(50.0)), tags_criterion(includes("c"))]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].title, "Gamma");
    }

    #[tokio::test]
    async fn find_iter_streams_matches_lazily() {
        let stream = find_iter_from_vec(rows(), &[rating_criterion(gt(50.0))]);
        tokio::pin!(stream);
        let mut titles = Vec::new();
        while let Some(row) = stream.next().await {
            titles.push(row.title);
        }
        assert_eq!(titles, vec!["Alpha".to_string(), "Gamma".to_string()]);
    }
}
