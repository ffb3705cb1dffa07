//! RocksDB-backed [`Store`].
//!
//! Column families:
//! - `documents` — document text (LZ4 compressed), keyed by document id
//! - `metadata`  — [`DocumentMetadata`] (bincode), keyed by document id
//! - `edits`     — accepted edits (bincode), keyed by `<doc_id>\0<version:8 bytes BE>`
//!
//! Snapshot and metadata of a document are always written in one batch.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

use coscribe_core::{content_to_lines, DocumentInfo, DocumentRecord, Edit};

use super::{Store, StoreError};

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";
const CF_EDITS: &str = "edits";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA, CF_EDITS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("coscribe_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Per-document bookkeeping stored next to the text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub title: String,
    pub version: u64,
    pub lines: usize,
    /// Uncompressed content size in bytes
    pub content_size: u64,
    /// Compressed content size in bytes
    pub compressed_size: u64,
    /// Seconds since epoch
    pub created_at: u64,
    /// Seconds since epoch
    pub updated_at: u64,
}

impl DocumentMetadata {
    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }

    fn info(&self) -> DocumentInfo {
        DocumentInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            version: self.version,
            lines: self.lines,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// RocksDB-backed document store.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes read-check-write of document snapshots.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened document store at {}", config.path.display());
        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            // Content is already LZ4 compressed on the way in.
            CF_DOCUMENTS => {
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_EDITS => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.set_max_write_buffer_number(4);
            }
            _ => {}
        }

        opts
    }

    // ─── Documents ────────────────────────────────────────────────────

    pub fn load_metadata(&self, id: &str) -> Result<DocumentMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => DocumentMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn load_content(&self, id: &str) -> Result<String, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let compressed = self
            .db
            .get_cf(&cf, id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let bytes = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StoreError::CompressionError(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| StoreError::DeserializationError(e.to_string()))
    }

    /// Write text and metadata of a document atomically.
    fn write_document(&self, record: &DocumentRecord, created_at: u64) -> Result<DocumentMetadata, StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(record.content.as_bytes());
        let meta = DocumentMetadata {
            id: record.id.clone(),
            title: record.title.clone(),
            version: record.version,
            lines: content_to_lines(&record.content).len(),
            content_size: record.content.len() as u64,
            compressed_size: compressed.len() as u64,
            created_at,
            updated_at: now_secs(),
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_docs, record.id.as_bytes(), &compressed);
        batch.put_cf(&cf_meta, record.id.as_bytes(), meta.encode()?);
        self.write(batch)?;

        Ok(meta)
    }

    // ─── Edits ────────────────────────────────────────────────────────

    /// Persisted edits of a document whose base version is `>= since`,
    /// in version order.
    pub fn edits_since(&self, doc_id: &str, since: u64) -> Result<Vec<Edit>, StoreError> {
        let cf = self.cf(CF_EDITS)?;
        let prefix = Self::edit_prefix(doc_id);
        let start = Self::edit_key(doc_id, since);

        let mut edits = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) || key.len() != prefix.len() + 8 {
                break;
            }
            let (edit, _) = bincode::serde::decode_from_slice(&value, bincode::config::standard())
                .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
            edits.push(edit);
        }

        Ok(edits)
    }

    /// Force memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn edit_prefix(doc_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(doc_id.len() + 1);
        prefix.extend_from_slice(doc_id.as_bytes());
        prefix.push(0);
        prefix
    }

    /// `<doc_id>\0<version:8 bytes big-endian>`: big-endian keeps versions
    /// in iteration order.
    fn edit_key(doc_id: &str, version: u64) -> Vec<u8> {
        let mut key = Self::edit_prefix(doc_id);
        key.extend_from_slice(&version.to_be_bytes());
        key
    }
}

impl Store for RocksStore {
    fn get_document(&self, id: &str) -> Result<DocumentRecord, StoreError> {
        let meta = self.load_metadata(id)?;
        let content = self.load_content(id)?;
        Ok(DocumentRecord {
            id: meta.id,
            title: meta.title,
            content,
            version: meta.version,
        })
    }

    fn create_document(&self, id: &str, title: &str) -> Result<DocumentRecord, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.get_document(id) {
            Err(StoreError::NotFound(_)) => {}
            existing => return existing,
        }

        let record = DocumentRecord {
            id: id.to_string(),
            title: title.to_string(),
            content: String::new(),
            version: 0,
        };
        self.write_document(&record, now_secs())?;
        log::debug!("Created document {id} in store");
        Ok(record)
    }

    fn update_document(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let created_at = match self.load_metadata(&record.id) {
            Ok(meta) if meta.version > record.version => {
                log::debug!(
                    "Ignoring stale snapshot of {} (v{} < v{})",
                    record.id,
                    record.version,
                    meta.version
                );
                return Ok(());
            }
            Ok(meta) => meta.created_at,
            Err(StoreError::NotFound(_)) => now_secs(),
            Err(e) => return Err(e),
        };
        self.write_document(record, created_at)?;
        Ok(())
    }

    fn save_edit(&self, doc_id: &str, edit: &Edit) -> Result<(), StoreError> {
        let cf = self.cf(CF_EDITS)?;
        let value = bincode::serde::encode_to_vec(edit, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, Self::edit_key(doc_id, edit.version), value);
        self.write(batch)
    }

    fn list_documents(&self) -> Result<Vec<DocumentInfo>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut rows = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(DocumentMetadata::decode(&value)?);
        }

        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows.iter().map(DocumentMetadata::info).collect())
    }
}

/// Number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
