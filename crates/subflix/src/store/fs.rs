use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::Mutex;

use super::{document_id, from_document, select, Document, Filter, Record, RecordStore, Sort};
use crate::error::StoreError;

/// One JSON file per record, laid out as `<root>/<collection>/<id>.json`.
///
/// Writes go through a temp file and a rename so readers (including the
/// monitor process) never observe a half-written record. Mutations are
/// serialized through a single lock.
pub struct JsonFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(JsonFileStore {
            root,
            write_lock: Mutex::new(()),
        })
    }
}

/// Ids become file names, so only accept a conservative alphabet
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Path of the file holding record `id`
pub fn record_path(root: &Path, collection: &str, id: &str) -> PathBuf {
    root.join(collection).join(format!("{}.json", id))
}

/// Write a document atomically
pub fn save_document(path: &Path, doc: &Document) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(doc)?;
    fs::write(&tmp, content).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn read_document(path: &Path) -> Result<Option<Document>, StoreError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let doc = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(doc))
}

/// Load every record file in a collection directory, with its path.
/// Unreadable or corrupt files are logged and skipped.
fn load_entries(dir: &Path) -> Result<Vec<(PathBuf, Document)>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut loaded = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading store entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_document(&path) {
            Ok(Some(doc)) => loaded.push((path, doc)),
            Ok(None) => {}
            Err(e) => warn!("Skipping record: {}", e),
        }
    }

    // Directory order is arbitrary
    loaded.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(loaded)
}

/// Load every document of a collection
pub fn load_documents(root: &Path, collection: &str) -> Result<Vec<Document>, StoreError> {
    Ok(load_entries(&root.join(collection))?
        .into_iter()
        .map(|(_, doc)| doc)
        .collect())
}

/// Load and decode every record of type `T` under `root`
pub fn load_records<T: Record>(root: &Path) -> Result<Vec<T>, StoreError> {
    load_documents(root, T::COLLECTION)?
        .into_iter()
        .map(from_document::<T>)
        .collect()
}

async fn blocking<F, R>(f: F) -> Result<R, StoreError>
where
    F: FnOnce() -> Result<R, StoreError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {}", e)))?
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn insert(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        let id = document_id(&doc)?.to_string();
        if !is_safe_id(&id) {
            return Err(StoreError::Backend(format!("unsupported record id: {:?}", id)));
        }
        let path = record_path(&self.root, collection, &id);
        let collection = collection.to_string();

        let _guard = self.write_lock.lock().await;
        blocking(move || {
            if path.exists() {
                return Err(StoreError::Duplicate { collection, id });
            }
            save_document(&path, &doc)
        })
        .await
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        limit: Option<usize>,
    ) -> Result<Vec<Document>, StoreError> {
        // Id lookups read one file instead of the whole collection
        let single = filter.id().map(|id| {
            is_safe_id(id).then(|| record_path(&self.root, collection, id))
        });
        let root = self.root.clone();
        let collection = collection.to_string();
        let filter = filter.clone();
        let sort = sort.cloned();
        blocking(move || {
            let docs = match single {
                Some(Some(path)) => read_document(&path)?.into_iter().collect(),
                Some(None) => Vec::new(),
                None => load_documents(&root, &collection)?,
            };
            Ok(select(docs, &filter, sort.as_ref(), limit))
        })
        .await
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<bool, StoreError> {
        if !is_safe_id(id) {
            return Ok(false);
        }
        let path = record_path(&self.root, collection, id);

        let _guard = self.write_lock.lock().await;
        blocking(move || {
            let Some(mut doc) = read_document(&path)? else {
                return Ok(false);
            };
            for (key, value) in fields.into_iter().filter(|(k, _)| k != "id") {
                doc.insert(key, value);
            }
            save_document(&path, &doc)?;
            Ok(true)
        })
        .await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let dir = self.root.join(collection);
        let filter = filter.clone();

        let _guard = self.write_lock.lock().await;
        blocking(move || {
            let mut removed = 0;
            for (path, doc) in load_entries(&dir)? {
                if !filter.matches(&doc) {
                    continue;
                }
                fs::remove_file(&path).map_err(|source| StoreError::Io {
                    path: path.clone(),
                    source,
                })?;
                removed += 1;
            }
            debug!("Removed {} record(s) from {}", removed, dir.display());
            Ok(removed)
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        // Wait out any in-flight write
        let _guard = self.write_lock.lock().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Settings;
    use crate::store::Collection;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).unwrap();
            store
                .insert("processing_jobs", doc(json!({"id": "j1", "status": "queued"})))
                .await
                .unwrap();
            store
                .update_fields("processing_jobs", "j1", doc(json!({"status": "processing"})))
                .await
                .unwrap();
            store.close().await.unwrap();
        }

        let store = JsonFileStore::open(dir.path()).unwrap();
        let found = store
            .find_one("processing_jobs", &Filter::all().eq("id", "j1"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["status"], json!("processing"));
        assert!(record_path(dir.path(), "processing_jobs", "j1").exists());
    }

    #[tokio::test]
    async fn id_lookup_reads_only_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store
            .insert("video_files", doc(json!({"id": "v1", "status": "pending"})))
            .await
            .unwrap();
        fs::write(record_path(dir.path(), "video_files", "v2"), "{not json").unwrap();

        let found = store
            .find_one("video_files", &Filter::all().eq("id", "v1"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["status"], json!("pending"));

        let missed = store
            .find_one("video_files", &Filter::all().eq("id", "v1").eq("status", "failed"), None)
            .await
            .unwrap();
        assert!(missed.is_none());

        // Read directly, so a corrupt target is an error rather than a skip
        assert!(store
            .find_one("video_files", &Filter::all().eq("id", "v2"), None)
            .await
            .is_err());
        assert!(store
            .find_one("video_files", &Filter::all().eq("id", "../v1"), None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store
            .insert("video_files", doc(json!({"id": "v1"})))
            .await
            .unwrap();
        fs::write(dir.path().join("video_files").join("broken.json"), "{not json").unwrap();
        fs::write(dir.path().join("video_files").join("notes.txt"), "ignored").unwrap();

        let all = store
            .find_many("video_files", &Filter::all(), None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn unsafe_ids_never_touch_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        let inserted = store
            .insert("video_files", doc(json!({"id": "../escape"})))
            .await;
        assert!(inserted.is_err());
        assert!(!store
            .update_fields("video_files", "../escape", Document::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_many_removes_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        for (id, status) in [("a", "failed"), ("b", "processing")] {
            store
                .insert("processing_jobs", doc(json!({"id": id, "status": status})))
                .await
                .unwrap();
        }
        let removed = store
            .delete_many("processing_jobs", &Filter::all().eq("status", "failed"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!record_path(dir.path(), "processing_jobs", "a").exists());
        assert!(record_path(dir.path(), "processing_jobs", "b").exists());
    }

    #[tokio::test]
    async fn typed_records_load_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let settings = Collection::<Settings>::new(store);
        let record = Settings::new();
        settings.insert(&record).await.unwrap();

        let loaded: Vec<Settings> = load_records(dir.path()).unwrap();
        assert_eq!(loaded, vec![record]);
    }
}
