//! Persistence collaborator for documents and their edit history.
//!
//! ```text
//! ┌─────────────────┐   get / create    ┌──────────────────────────┐
//! │ DocumentManager │ ────────────────► │ dyn Store                │
//! │ (in-memory,     │   update / edit   │  ├── MemoryStore (tests, │
//! │  authoritative) │ ────────────────► │  │   standalone)         │
//! └─────────────────┘   best effort     │  └── RocksStore (disk)   │
//!                                       └──────────────────────────┘
//! ```
//!
//! The manager only relies on the five [`Store`] operations and on
//! [`StoreError::NotFound`] meaning "no such document".

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{DocumentMetadata, RocksStore, StoreConfig};

use coscribe_core::{DocumentInfo, DocumentRecord, Edit};

/// Durable load/save of documents and edits.
pub trait Store: Send + Sync {
    /// Load a document. `Err(StoreError::NotFound)` if there is none.
    fn get_document(&self, id: &str) -> Result<DocumentRecord, StoreError>;

    /// Create an empty document, or return the existing one.
    fn create_document(&self, id: &str, title: &str) -> Result<DocumentRecord, StoreError>;

    /// Persist the current snapshot of a document.
    ///
    /// A record older than the stored version is ignored, so snapshots
    /// written out of order never roll a document back.
    fn update_document(&self, record: &DocumentRecord) -> Result<(), StoreError>;

    /// Append an accepted edit to the document's history.
    fn save_edit(&self, doc_id: &str, edit: &Edit) -> Result<(), StoreError>;

    /// All stored documents, most recently updated first.
    fn list_documents(&self) -> Result<Vec<DocumentInfo>, StoreError>;
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Document not found
    NotFound(String),
    /// Serialization failed
    SerializationError(String),
    /// Deserialization failed
    DeserializationError(String),
    /// Compression error
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(id) => write!(f, "Document not found: {id}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
