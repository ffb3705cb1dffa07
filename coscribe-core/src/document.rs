//! Line-indexed text buffer with optimistic version control.
//!
//! A [`Document`] keeps its text twice: as the full `content` string and as
//! the `lines` it splits into on `'\n'`. After every accepted mutation
//! `content == lines.join("\n")` and the version has moved up by exactly one.
//! Rejected edits leave all three untouched.
//!
//! ```text
//!   edit(v=3) ──► version check ──► line check ──► kind ──► mutate lines
//!                    │                 │            │           │
//!                    ▼                 ▼            ▼           ▼
//!             VersionConflict     InvalidLine  InvalidEditType  version += 1
//!                                                               content = join(lines)
//! ```

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::edit::{Edit, EditError, EditKind};

/// Title given to documents created on first access.
pub const UNTITLED: &str = "Untitled Document";

/// Persisted form of a document: everything needed to rebuild it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    pub version: u64,
}

/// Listing row for a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub title: String,
    pub version: u64,
    pub lines: usize,
}

/// Split text into lines. Empty text is a single empty line.
pub fn content_to_lines(content: &str) -> Vec<String> {
    content.split('\n').map(str::to_string).collect()
}

struct DocumentState {
    content: String,
    lines: Vec<String>,
    version: u64,
}

impl DocumentState {
    fn refresh_content(&mut self) {
        self.content = self.lines.join("\n");
    }

    fn insert(&mut self, idx: usize, column: usize, text: &str) -> Result<(), EditError> {
        let line = &self.lines[idx];
        let at = byte_offset(line, column).ok_or_else(|| invalid_column(line, column))?;

        if !text.contains('\n') {
            self.lines[idx].insert_str(at, text);
            return Ok(());
        }

        // Split the target line around the insertion point.
        let before = &line[..at];
        let after = &line[at..];
        let mut segments: Vec<String> = text.split('\n').map(str::to_string).collect();
        segments[0].insert_str(0, before);
        if let Some(last) = segments.last_mut() {
            last.push_str(after);
        }

        self.lines.splice(idx..=idx, segments);
        Ok(())
    }

    /// Swap the `[column, column + length)` span of one line for `text`.
    /// The end of the span is clamped to the end of the line.
    fn splice(&mut self, idx: usize, column: usize, length: usize, text: &str) -> Result<(), EditError> {
        let line = &self.lines[idx];
        let start = byte_offset(line, column).ok_or_else(|| invalid_column(line, column))?;
        let end = byte_offset(line, column.saturating_add(length)).unwrap_or(line.len());

        self.lines[idx].replace_range(start..end, text);
        Ok(())
    }
}

/// Byte index of the `column`-th character, or `None` past end of line.
fn byte_offset(line: &str, column: usize) -> Option<usize> {
    line.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(line.len()))
        .nth(column)
}

fn invalid_column(line: &str, column: usize) -> EditError {
    EditError::InvalidColumn {
        column,
        line_len: line.chars().count(),
    }
}

/// One collaboratively edited document.
///
/// Mutations take the exclusive lock; the getters share it.
pub struct Document {
    id: String,
    title: String,
    state: RwLock<DocumentState>,
}

impl Document {
    /// Create an empty document at version 0.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            state: RwLock::new(DocumentState {
                content: String::new(),
                lines: vec![String::new()],
                version: 0,
            }),
        }
    }

    /// Rebuild a document from its persisted record.
    pub fn from_record(record: DocumentRecord) -> Self {
        let lines = content_to_lines(&record.content);
        Self {
            id: record.id,
            title: record.title,
            state: RwLock::new(DocumentState {
                content: record.content,
                lines,
                version: record.version,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> String {
        self.read().content.clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.read().lines.clone()
    }

    pub fn line_count(&self) -> usize {
        self.read().lines.len()
    }

    pub fn version(&self) -> u64 {
        self.read().version
    }

    /// Content and version read under one lock.
    pub fn state(&self) -> (String, u64) {
        let state = self.read();
        (state.content.clone(), state.version)
    }

    pub fn snapshot(&self) -> DocumentRecord {
        let state = self.read();
        DocumentRecord {
            id: self.id.clone(),
            title: self.title.clone(),
            content: state.content.clone(),
            version: state.version,
        }
    }

    pub fn info(&self) -> DocumentInfo {
        let state = self.read();
        DocumentInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            version: state.version,
            lines: state.lines.len(),
        }
    }

    /// Overwrite the whole text. Last writer wins: no version check is made,
    /// unlike [`Document::apply_edit`]. Returns the new version.
    pub fn set_content(&self, content: impl Into<String>) -> u64 {
        let mut state = self.write();
        state.content = content.into();
        state.lines = content_to_lines(&state.content);
        state.version += 1;
        state.version
    }

    /// Apply one edit computed against exactly the current version.
    ///
    /// Returns the version the edit produced.
    pub fn apply_edit(&self, edit: &Edit) -> Result<u64, EditError> {
        let mut state = self.write();

        if edit.version != state.version {
            return Err(EditError::VersionConflict {
                expected: state.version,
                actual: edit.version,
            });
        }

        let line_count = state.lines.len();
        let idx = usize::try_from(edit.line_no)
            .ok()
            .filter(|&i| i < line_count)
            .ok_or(EditError::InvalidLine {
                line: edit.line_no,
                max_lines: line_count,
            })?;

        match &edit.kind {
            EditKind::Insert => state.insert(idx, edit.column, &edit.content)?,
            EditKind::Delete => state.splice(idx, edit.column, edit.length, "")?,
            // Confined to one line: newlines in the payload do not add lines.
            EditKind::Replace => state.splice(idx, edit.column, edit.length, &edit.content)?,
            EditKind::Other(kind) => return Err(EditError::InvalidEditType(kind.clone())),
        }

        state.version += 1;
        state.refresh_content();

        log::trace!("doc {} accepted {} -> v{}", self.id, edit.kind, state.version);
        Ok(state.version)
    }

    fn read(&self) -> RwLockReadGuard<'_, DocumentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DocumentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("version", &state.version)
            .field("lines", &state.lines.len())
            .finish()
    }
}
