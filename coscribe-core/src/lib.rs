//! # coscribe-core — versioned text documents
//!
//! The authoritative, line-indexed buffer behind every shared document,
//! plus the positional edits clients submit against it.
//!
//! Edits are accepted under strict optimistic concurrency: an edit names the
//! version it was computed against and is refused unless that is exactly the
//! current version. Only one edit can win each version tick; the loser must
//! refetch and recompute.
//!
//! ## Modules
//!
//! - [`document`] — `Document`, its persisted `DocumentRecord` and listing `DocumentInfo`
//! - [`edit`] — `Edit`, `EditKind`, `EditError`

pub mod document;
pub mod edit;

pub use document::{content_to_lines, Document, DocumentInfo, DocumentRecord, UNTITLED};
pub use edit::{Edit, EditError, EditKind};
