use std::path::PathBuf;

use core_types::{BookId, RunId, SegmentId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {run_id} not found")]
    MissingRun { run_id: RunId },
    #[error("book {book_id} not found")]
    MissingBook { book_id: BookId },
    #[error("segment {segment_id} referenced by run {run_id} not found")]
    MissingSegment { run_id: RunId, segment_id: SegmentId },
    #[error("snapshot {path} unreadable: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unexpected closing tag </{found}> at byte {offset}, expected </{expected}>")]
    MismatchedClose {
        expected: String,
        found: String,
        offset: usize,
    },
    #[error("closing tag </{found}> at byte {offset} has no matching opening tag")]
    StrayClose { found: String, offset: usize },
    #[error("element <{name}> is never closed")]
    Unclosed { name: String },
}

/// Cursor arithmetic between `body` and `annotated_text` went wrong; the pass
/// is aborted before anything is saved.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("book {book_id}: annotated text holds {annotated} chars but body only {total}")]
    CursorOverrun {
        book_id: BookId,
        annotated: usize,
        total: usize,
    },
    #[error("book {book_id}: pass consumed {consumed} chars but emitted markup strips to {emitted}")]
    MarkupDrift {
        book_id: BookId,
        consumed: usize,
        emitted: usize,
    },
    #[error("book {book_id}: pass starting at char {start} consumed nothing with {remaining} chars left")]
    Stalled {
        book_id: BookId,
        start: usize,
        remaining: usize,
    },
    #[error("book {book_id}: finished annotated text is not well formed: {source}")]
    UnbalancedMarkup {
        book_id: BookId,
        #[source]
        source: DocumentError,
    },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("document error in book {book_id}: {source}")]
    Document {
        book_id: BookId,
        #[source]
        source: DocumentError,
    },
    #[error("integrity fault: {0}")]
    Integrity(#[from] IntegrityError),
}
