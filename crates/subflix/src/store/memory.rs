use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{document_id, select, Document, Filter, RecordStore, Sort};
use crate::error::StoreError;

/// Process-local store. Documents keep insertion order per collection.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        let id = document_id(&doc)?.to_string();
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.get("id").and_then(|v| v.as_str()) == Some(id.as_str())) {
            return Err(StoreError::Duplicate {
                collection: collection.to_string(),
                id,
            });
        }
        docs.push(doc);
        Ok(())
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let docs = collections.get(collection).cloned().unwrap_or_default();
        Ok(select(docs, filter, sort, limit))
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs
            .iter_mut()
            .find(|d| d.get("id").and_then(|v| v.as_str()) == Some(id))
        {
            Some(doc) => {
                // `id` is immutable
                for (key, value) in fields.into_iter().filter(|(k, _)| k != "id") {
                    doc.insert(key, value);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicates_and_missing_ids() {
        let store = MemoryStore::new();
        store.insert("jobs", doc(json!({"id": "a"}))).await.unwrap();
        let dup = store.insert("jobs", doc(json!({"id": "a"}))).await;
        assert!(matches!(dup, Err(StoreError::Duplicate { .. })));
        let missing = store.insert("jobs", doc(json!({"name": "x"}))).await;
        assert!(matches!(missing, Err(StoreError::MissingId)));
    }

    #[tokio::test]
    async fn update_merges_fields_but_keeps_id() {
        let store = MemoryStore::new();
        store
            .insert("jobs", doc(json!({"id": "a", "status": "queued", "progress": 0})))
            .await
            .unwrap();
        let updated = store
            .update_fields("jobs", "a", doc(json!({"id": "zzz", "progress": 10})))
            .await
            .unwrap();
        assert!(updated);
        let found = store
            .find_one("jobs", &Filter::all().eq("id", "a"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["progress"], json!(10));
        assert_eq!(found["status"], json!("queued"));
        assert!(!store.update_fields("jobs", "nope", Document::new()).await.unwrap());
    }

    #[tokio::test]
    async fn delete_many_counts_removed() {
        let store = MemoryStore::new();
        for (id, status) in [("a", "queued"), ("b", "failed"), ("c", "completed")] {
            store
                .insert("jobs", doc(json!({"id": id, "status": status})))
                .await
                .unwrap();
        }
        let removed = store
            .delete_many("jobs", &Filter::all().any_of("status", ["failed", "completed"]))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        let rest = store.find_many("jobs", &Filter::all(), None, None).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(store.delete_many("other", &Filter::all()).await.unwrap(), 0);
    }
}
