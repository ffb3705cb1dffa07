//! Persistence integration tests.
//!
//! Verifies:
//! - Edits applied through the manager land in RocksDB
//! - Restart recovery: drop everything, reopen, data survives
//! - Edit history is kept in version order per document
//! - Multi-document isolation under persistence
//! - Large documents are stored compressed

use std::sync::Arc;

use coscribe_collab::manager::DocumentManager;
use coscribe_collab::server::{CollabServer, ServerConfig};
use coscribe_collab::storage::{RocksStore, Store, StoreConfig, StoreError};
use coscribe_core::{Edit, UNTITLED};
use tempfile::tempdir;

fn open(path: &std::path::Path) -> Arc<RocksStore> {
    Arc::new(RocksStore::open(StoreConfig::for_testing(path)).unwrap())
}

/// Roughly `approx_bytes` of text that compresses well.
fn repetitive_text(approx_bytes: usize) -> String {
    let line = "The quick brown fox jumps over the lazy dog.\n";
    line.repeat(approx_bytes / line.len() + 1)
}

#[tokio::test]
async fn test_edits_survive_restart() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    // Phase 1: edit through the manager, then drop everything.
    {
        let store = open(&db_path);
        let manager = DocumentManager::with_store(store.clone());

        let mut first = Edit::insert(0, 0, "hello world", 0).by("alice");
        manager.apply_edit("notes", &mut first).await.unwrap();
        let mut second = Edit::insert(0, 5, "\n", 1).by("bob");
        manager.apply_edit("notes", &mut second).await.unwrap();
        store.sync().unwrap();
    }

    // Phase 2: a fresh manager loads the persisted state.
    {
        let store = open(&db_path);
        let manager = DocumentManager::with_store(store.clone());
        let doc = manager.get_document("notes").await;

        assert_eq!(doc.lines(), vec!["hello", " world"]);
        assert_eq!(doc.version(), 2);
        assert_eq!(doc.title(), UNTITLED);

        let history = store.edits_since("notes", 0).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].user, "alice");
        assert_eq!(history[1].user, "bob");
        assert_eq!(history[1].version, 1);

        // Editing continues from the recovered version.
        let mut third = Edit::delete(1, 0, 1, 2);
        assert_eq!(manager.apply_edit("notes", &mut third).await, Ok(3));
    }
}

#[tokio::test]
async fn test_first_access_creates_stored_document() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("db"));
    assert!(matches!(store.get_document("fresh"), Err(StoreError::NotFound(_))));

    let manager = DocumentManager::with_store(store.clone());
    manager.get_document("fresh").await;

    let record = store.get_document("fresh").unwrap();
    assert_eq!(record.title, UNTITLED);
    assert_eq!(record.version, 0);
    assert_eq!(record.content, "");
}

#[tokio::test]
async fn test_save_document_after_overwrite() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("db"));
    let manager = DocumentManager::with_store(store.clone());

    let doc = manager.get_document("page").await;
    doc.set_content("replaced wholesale");
    manager.save_document("page").await.unwrap();

    let record = store.get_document("page").unwrap();
    assert_eq!(record.content, "replaced wholesale");
    assert_eq!(record.version, 1);
}

#[tokio::test]
async fn test_rejected_edits_leave_store_untouched() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("db"));
    let manager = DocumentManager::with_store(store.clone());

    let mut ok = Edit::insert(0, 0, "abcdef", 0);
    manager.apply_edit("d", &mut ok).await.unwrap();
    let mut stale = Edit::delete(0, 0, 3, 0);
    assert!(manager.apply_edit("d", &mut stale).await.is_err());
    let mut bad_kind = Edit::insert(0, 0, "x", 1);
    bad_kind.kind = "upsert".to_string().into();
    assert!(manager.apply_edit("d", &mut bad_kind).await.is_err());

    assert_eq!(store.edits_since("d", 0).unwrap().len(), 1);
    let record = store.get_document("d").unwrap();
    assert_eq!(record.content, "abcdef");
    assert_eq!(record.version, 1);
}

#[tokio::test]
async fn test_multi_document_isolation() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("db"));
    let manager = DocumentManager::with_store(store.clone());

    for (i, id) in ["alpha", "beta", "gamma"].iter().enumerate() {
        for v in 0..=i as u64 {
            let mut edit = Edit::insert(0, 0, id.to_string(), v);
            manager.apply_edit(id, &mut edit).await.unwrap();
        }
    }

    assert_eq!(store.get_document("alpha").unwrap().version, 1);
    assert_eq!(store.get_document("beta").unwrap().version, 2);
    assert_eq!(store.get_document("gamma").unwrap().content, "gammagammagamma");
    assert_eq!(store.edits_since("beta", 0).unwrap().len(), 2);

    let mut ids: Vec<String> = store
        .list_documents()
        .unwrap()
        .into_iter()
        .map(|info| info.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["alpha", "beta", "gamma"]);
}

#[test]
fn test_large_document_is_compressed() {
    let dir = tempdir().unwrap();
    let store = open(&dir.path().join("db"));
    let content = repetitive_text(1024 * 1024);

    store
        .update_document(&coscribe_core::DocumentRecord {
            id: "big".into(),
            title: "Big".into(),
            content: content.clone(),
            version: 1,
        })
        .unwrap();

    let meta = store.load_metadata("big").unwrap();
    assert_eq!(meta.content_size, content.len() as u64);
    assert!(meta.compressed_size * 10 < meta.content_size);
    assert_eq!(store.get_document("big").unwrap().content, content);
}

#[tokio::test]
async fn test_server_persistence_config() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("db");

    {
        let server = CollabServer::new(ServerConfig {
            storage_path: Some(db_path.clone()),
            ..ServerConfig::default()
        })
        .unwrap();
        let mut edit = Edit::insert(0, 0, "persisted via server", 0);
        server.manager().apply_edit("doc", &mut edit).await.unwrap();
    }

    let store = open(&db_path);
    assert_eq!(store.get_document("doc").unwrap().content, "persisted via server");
}
