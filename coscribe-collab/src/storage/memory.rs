//! In-memory [`Store`] for tests and standalone runs. Nothing survives a restart.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use coscribe_core::{content_to_lines, DocumentInfo, DocumentRecord, Edit};

use super::{Store, StoreError};

struct StoredDocument {
    record: DocumentRecord,
    updated_at: DateTime<Utc>,
    edits: Vec<Edit>,
}

impl StoredDocument {
    fn new(record: DocumentRecord) -> Self {
        Self {
            record,
            updated_at: Utc::now(),
            edits: Vec::new(),
        }
    }
}

/// Documents and edit history kept in a `HashMap` behind a `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted edits of a document, in the order they were saved.
    pub fn edits(&self, doc_id: &str) -> Vec<Edit> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(doc_id)
            .map(|doc| doc.edits.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get_document(&self, id: &str) -> Result<DocumentRecord, StoreError> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|doc| doc.record.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn create_document(&self, id: &str, title: &str) -> Result<DocumentRecord, StoreError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let doc = documents.entry(id.to_string()).or_insert_with(|| {
            StoredDocument::new(DocumentRecord {
                id: id.to_string(),
                title: title.to_string(),
                content: String::new(),
                version: 0,
            })
        });
        Ok(doc.record.clone())
    }

    fn update_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let doc = documents
            .entry(record.id.clone())
            .or_insert_with(|| StoredDocument::new(record.clone()));
        if record.version < doc.record.version {
            log::debug!(
                "Ignoring stale snapshot of {} (v{} < v{})",
                record.id,
                record.version,
                doc.record.version
            );
            return Ok(());
        }
        doc.record = record.clone();
        doc.updated_at = Utc::now();
        Ok(())
    }

    fn save_edit(&self, doc_id: &str, edit: &Edit) -> Result<(), StoreError> {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let doc = documents
            .get_mut(doc_id)
            .ok_or_else(|| StoreError::NotFound(doc_id.to_string()))?;
        doc.edits.push(edit.clone());
        Ok(())
    }

    fn list_documents(&self) -> Result<Vec<DocumentInfo>, StoreError> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<(DateTime<Utc>, DocumentInfo)> = documents
            .values()
            .map(|doc| {
                let info = DocumentInfo {
                    id: doc.record.id.clone(),
                    title: doc.record.title.clone(),
                    version: doc.record.version,
                    lines: content_to_lines(&doc.record.content).len(),
                };
                (doc.updated_at, info)
            })
            .collect();
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(rows.into_iter().map(|(_, info)| info).collect())
    }
}
