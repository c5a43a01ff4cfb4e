//! Document store collaborator.
//!
//! The core only needs five operations per collection: insert, find one,
//! find many, update fields by id and delete many. Records travel as JSON
//! documents so any backend that can hold a `serde_json::Map` can serve
//! them; [`Collection`] layers typed access on top.

pub mod fs;
pub mod memory;

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StoreError;

pub use fs::JsonFileStore;
pub use memory::MemoryStore;

/// A stored record as a JSON object
pub type Document = Map<String, Value>;

/// Entity kinds the store knows how to hold
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// Equality-based document filter
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
enum Clause {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    /// Matches every document
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(Clause::Eq(field.to_string(), value.into()));
        self
    }

    pub fn any_of<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push(Clause::In(field.to_string(), values));
        self
    }

    /// The id this filter pins, if it has an `id` equality clause
    pub fn id(&self) -> Option<&str> {
        self.clauses.iter().find_map(|clause| match clause {
            Clause::Eq(field, Value::String(id)) if field == "id" => Some(id.as_str()),
            _ => None,
        })
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Eq(field, expected) => field_value(doc, field) == expected,
            Clause::In(field, options) => {
                let actual = field_value(doc, field);
                options.iter().any(|v| v == actual)
            }
        })
    }
}

fn field_value<'a>(doc: &'a Document, field: &str) -> &'a Value {
    doc.get(field).unwrap_or(&Value::Null)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Single-field sort order
#[derive(Debug, Clone)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(field: &str) -> Self {
        Sort {
            field: field.to_string(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(field: &str) -> Self {
        Sort {
            field: field.to_string(),
            order: SortOrder::Descending,
        }
    }

    /// Stable in-place sort of `docs`
    pub fn apply(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| {
            let ord = compare_values(field_value(a, &self.field), field_value(b, &self.field));
            match self.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });
    }
}

/// Ordering for sort keys. RFC 3339 strings compare as instants because
/// their fractional-second width varies.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Set of top-level fields to overwrite on a record
#[derive(Debug, Clone, Default)]
pub struct Patch {
    fields: Document,
}

impl Patch {
    pub fn new() -> Self {
        Patch::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn set_time(self, field: &str, ts: DateTime<Utc>) -> Self {
        self.set(field, timestamp(ts))
    }

    pub fn into_fields(self) -> Document {
        self.fields
    }
}

/// Timestamp in the same RFC 3339 form chrono's serde impl writes
pub fn timestamp(ts: DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Backend contract for a key-value/document store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a document. Fails if it has no string `id` or the id exists.
    async fn insert(&self, collection: &str, doc: Document) -> Result<(), StoreError>;

    /// Matching documents, optionally sorted and truncated to `limit`
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Merge `fields` into the document with `id`. Returns false when absent.
    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<bool, StoreError>;

    /// Delete matching documents, returning how many were removed
    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> Result<Option<Document>, StoreError> {
        let mut docs = self.find_many(collection, filter, sort, Some(1)).await?;
        Ok(docs.pop())
    }

    /// Flush and release backend resources
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub(crate) fn document_id(doc: &Document) -> Result<&str, StoreError> {
    doc.get("id")
        .and_then(Value::as_str)
        .ok_or(StoreError::MissingId)
}

/// Apply the shared find semantics to an already-loaded document set
pub(crate) fn select(
    docs: impl IntoIterator<Item = Document>,
    filter: &Filter,
    sort: Option<&Sort>,
    limit: Option<usize>,
) -> Vec<Document> {
    let mut matched: Vec<Document> = docs.into_iter().filter(|d| filter.matches(d)).collect();
    if let Some(sort) = sort {
        sort.apply(&mut matched);
    }
    if let Some(limit) = limit {
        matched.truncate(limit);
    }
    matched
}

/// Typed view over one collection
pub struct Collection<T> {
    store: Arc<dyn RecordStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Collection {
            store: Arc::clone(&self.store),
            _marker: PhantomData,
        }
    }
}

impl<T: Record> Collection<T> {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Collection {
            store,
            _marker: PhantomData,
        }
    }

    pub async fn insert(&self, record: &T) -> Result<(), StoreError> {
        self.store.insert(T::COLLECTION, to_document(record)?).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.find_one(&Filter::all().eq("id", id), None).await
    }

    pub async fn find_one(&self, filter: &Filter, sort: Option<&Sort>) -> Result<Option<T>, StoreError> {
        match self.store.find_one(T::COLLECTION, filter, sort).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn find_many(
        &self,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<T>, StoreError> {
        self.store
            .find_many(T::COLLECTION, filter, sort, limit)
            .await?
            .into_iter()
            .map(from_document::<T>)
            .collect()
    }

    pub async fn update(&self, id: &str, patch: Patch) -> Result<bool, StoreError> {
        self.store
            .update_fields(T::COLLECTION, id, patch.into_fields())
            .await
    }

    pub async fn delete_many(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.store.delete_many(T::COLLECTION, filter).await
    }
}

pub fn to_document<T: Serialize>(record: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::MissingId),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn filter_eq_and_any_of() {
        let d = doc(json!({"id": "1", "status": "queued", "video_file_id": "v"}));
        assert!(Filter::all().matches(&d));
        assert!(Filter::all().eq("video_file_id", "v").matches(&d));
        assert!(!Filter::all().eq("video_file_id", "w").matches(&d));
        assert!(Filter::all()
            .any_of("status", ["queued", "processing"])
            .matches(&d));
        assert!(!Filter::all().any_of("status", ["failed"]).matches(&d));
    }

    #[test]
    fn id_clause_is_exposed() {
        assert_eq!(Filter::all().eq("status", "queued").eq("id", "j1").id(), Some("j1"));
        assert_eq!(Filter::all().eq("video_file_id", "v").id(), None);
        assert_eq!(Filter::all().eq("id", 7).id(), None);
    }

    #[test]
    fn missing_field_matches_null() {
        let d = doc(json!({"id": "1"}));
        assert!(Filter::all().eq("error_message", Value::Null).matches(&d));
    }

    #[test]
    fn sort_orders_rfc3339_by_instant() {
        // Differing fractional widths would mis-order as plain strings
        let mut docs = vec![
            doc(json!({"id": "a", "created_at": "2024-01-01T00:00:00.500Z"})),
            doc(json!({"id": "b", "created_at": "2024-01-01T00:00:00Z"})),
            doc(json!({"id": "c", "created_at": "2024-01-01T00:00:01Z"})),
        ];
        Sort::desc("created_at").apply(&mut docs);
        let ids: Vec<_> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn select_applies_limit_after_sort() {
        let docs = vec![
            doc(json!({"id": "a", "n": 1})),
            doc(json!({"id": "b", "n": 3})),
            doc(json!({"id": "c", "n": 2})),
        ];
        let out = select(docs, &Filter::all(), Some(&Sort::desc("n")), Some(2));
        let ids: Vec<_> = out.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn timestamp_round_trips_through_serde() {
        let now = Utc::now();
        let back: DateTime<Utc> = serde_json::from_value(timestamp(now)).unwrap();
        assert_eq!(back, now);
    }
}
