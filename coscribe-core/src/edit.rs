//! Positional edit requests and the errors they can produce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The operation an [`Edit`] performs.
///
/// Unknown kinds are kept verbatim in [`EditKind::Other`] so that a bad
/// request survives deserialization and is rejected by the document with
/// [`EditError::InvalidEditType`] instead of being dropped as a malformed
/// frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EditKind {
    Insert,
    Delete,
    Replace,
    Other(String),
}

impl EditKind {
    pub fn as_str(&self) -> &str {
        match self {
            EditKind::Insert => "insert",
            EditKind::Delete => "delete",
            EditKind::Replace => "replace",
            EditKind::Other(kind) => kind,
        }
    }
}

impl From<String> for EditKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "insert" => EditKind::Insert,
            "delete" => EditKind::Delete,
            "replace" => EditKind::Replace,
            _ => EditKind::Other(kind),
        }
    }
}

impl From<EditKind> for String {
    fn from(kind: EditKind) -> Self {
        match kind {
            EditKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single positional mutation, computed by a client against `version`.
///
/// `column` and `length` count characters, not bytes. `line_no` is signed
/// so that a negative index from the wire is reported as
/// [`EditError::InvalidLine`] like any other out-of-range line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    #[serde(rename = "type")]
    pub kind: EditKind,
    #[serde(default)]
    pub line_no: i64,
    #[serde(default)]
    pub column: usize,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub length: usize,
    #[serde(default)]
    pub version: u64,
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub user: String,
}

impl Edit {
    fn new(kind: EditKind, line_no: i64, column: usize, content: String, length: usize, version: u64) -> Self {
        Self {
            kind,
            line_no,
            column,
            content,
            length,
            version,
            time: Utc::now(),
            user: String::new(),
        }
    }

    /// Insert `text` at `column` of `line_no`.
    pub fn insert(line_no: i64, column: usize, text: impl Into<String>, version: u64) -> Self {
        Self::new(EditKind::Insert, line_no, column, text.into(), 0, version)
    }

    /// Delete up to `length` characters starting at `column` of `line_no`.
    pub fn delete(line_no: i64, column: usize, length: usize, version: u64) -> Self {
        Self::new(EditKind::Delete, line_no, column, String::new(), length, version)
    }

    /// Replace up to `length` characters starting at `column` with `text`.
    pub fn replace(
        line_no: i64,
        column: usize,
        length: usize,
        text: impl Into<String>,
        version: u64,
    ) -> Self {
        Self::new(EditKind::Replace, line_no, column, text.into(), length, version)
    }

    /// Attach the author of this edit.
    pub fn by(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}

/// Why a document refused an edit. The document is untouched in every case.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    /// `expected` is the document's version, `actual` the edit's.
    #[error("version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("invalid line number: {line} (max: {})", *.max_lines as i64 - 1)]
    InvalidLine { line: i64, max_lines: usize },
    #[error("invalid column: {column} (line length: {line_len})")]
    InvalidColumn { column: usize, line_len: usize },
    #[error("invalid edit type: {0}")]
    InvalidEditType(String),
}
