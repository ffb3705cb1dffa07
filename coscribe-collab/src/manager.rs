//! One live [`Document`] per identifier, backed by an optional [`Store`].
//!
//! The in-memory document is authoritative for the lifetime of the process.
//! Persistence after an accepted edit is best effort: failures are logged
//! and never reach the editing client.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use coscribe_core::{Document, DocumentInfo, Edit, EditError, UNTITLED};
use tokio::sync::RwLock;

use crate::storage::{Store, StoreError};

/// Cache of live documents.
pub struct DocumentManager {
    documents: RwLock<HashMap<String, Arc<Document>>>,
    store: Option<Arc<dyn Store>>,
}

impl DocumentManager {
    /// A manager without persistence.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    /// The live document for `id`, loading or creating it on first use.
    ///
    /// Never fails: a missing or unreadable stored document yields a fresh
    /// empty one.
    pub async fn get_document(&self, id: &str) -> Arc<Document> {
        if let Some(doc) = self.documents.read().await.get(id) {
            return doc.clone();
        }

        // Load outside the lock; a concurrent loader may win the insert below.
        let loaded = self.load(id);

        let mut documents = self.documents.write().await;
        documents
            .entry(id.to_string())
            .or_insert_with(|| {
                log::debug!("Document {id} cached");
                Arc::new(loaded)
            })
            .clone()
    }

    fn load(&self, id: &str) -> Document {
        let Some(store) = &self.store else {
            return Document::new(id, UNTITLED);
        };

        match store.get_document(id) {
            Ok(record) => {
                log::info!("Loaded document {id} (version {})", record.version);
                Document::from_record(record)
            }
            Err(StoreError::NotFound(_)) => {
                if let Err(e) = store.create_document(id, UNTITLED) {
                    log::warn!("Failed to create document {id} in store: {e}");
                }
                Document::new(id, UNTITLED)
            }
            Err(e) => {
                log::warn!("Failed to load document {id}, starting empty: {e}");
                Document::new(id, UNTITLED)
            }
        }
    }

    /// Apply `edit` to document `id`, returning the version it produced.
    ///
    /// `edit.time` is overwritten with the current time. Snapshots may reach
    /// the store out of order; the store keeps the highest version.
    pub async fn apply_edit(&self, id: &str, edit: &mut Edit) -> Result<u64, EditError> {
        let doc = self.get_document(id).await;
        edit.time = Utc::now();
        let version = doc.apply_edit(edit)?;

        if let Some(store) = &self.store {
            if let Err(e) = store.save_edit(id, edit) {
                log::error!("Failed to persist edit {} of document {id}: {e}", edit.version);
            }
            if let Err(e) = store.update_document(&doc.snapshot()) {
                log::error!("Failed to persist document {id}: {e}");
            }
        }

        Ok(version)
    }

    /// Write the current snapshot of a cached document to the store.
    ///
    /// A no-op without a store.
    pub async fn save_document(&self, id: &str) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let doc = self
            .documents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        store.update_document(&doc.snapshot())
    }

    /// Listing row of a cached document.
    pub async fn document_info(&self, id: &str) -> Option<DocumentInfo> {
        self.documents.read().await.get(id).map(|doc| doc.info())
    }

    /// All cached documents, sorted by id.
    pub async fn list_documents(&self) -> Vec<DocumentInfo> {
        let mut infos: Vec<DocumentInfo> = self
            .documents
            .read()
            .await
            .values()
            .map(|doc| doc.info())
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub async fn cached_count(&self) -> usize {
        self.documents.read().await.len()
    }
}

impl Default for DocumentManager {
    fn default() -> Self {
        Self::new()
    }
}
