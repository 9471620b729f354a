// Copyright (c) James Kassemi, SC, US. All rights reserved.

use serde::{Deserialize, Serialize};

pub type RunId = u64;
pub type BookId = u64;
pub type SegmentId = u64;
pub type Uid = u64;
/// Unix seconds.
pub type Timestamp = i64;
pub type Meters = u64;
pub type AnnotationNumber = u64;

/// Lifecycle state of a recorded run. Only [`RunStatus::Success`] runs are
/// ever attributed to text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_success(self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

/// What a single read contributes to its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentKind {
    /// Distance covered, credited to whoever currently owns the run.
    Measured { length: Meters },
    /// Zero-length marker handing the run over to `owner` from `created` on.
    Takeover,
}

/// One read of a run: either a measured stretch or an ownership transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSegment {
    pub id: SegmentId,
    pub owner: Uid,
    pub created: Timestamp,
    #[serde(flatten)]
    pub kind: SegmentKind,
}

impl ReadSegment {
    pub fn measured(id: SegmentId, owner: Uid, created: Timestamp, length: Meters) -> Self {
        Self {
            id,
            owner,
            created,
            kind: SegmentKind::Measured { length },
        }
    }

    pub fn takeover(id: SegmentId, owner: Uid, created: Timestamp) -> Self {
        Self {
            id,
            owner,
            created,
            kind: SegmentKind::Takeover,
        }
    }

    pub fn length(&self) -> Meters {
        match self.kind {
            SegmentKind::Measured { length } => length,
            SegmentKind::Takeover => 0,
        }
    }
}

/// A GPS-tracked activity, stored as an ordered list of read ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub read_ids: Vec<SegmentId>,
    /// Sequential position in the annotation history, assigned once the
    /// run has been written into the book.
    #[serde(default)]
    pub annotation_number: Option<AnnotationNumber>,
    /// Legacy annotation time recorded before numbering existed.
    #[serde(default)]
    pub annotated_at: Option<Timestamp>,
    /// Characters already written into books while the run waits for a
    /// number. A retry skips this many characters.
    #[serde(default)]
    pub written_chars: usize,
}

impl Run {
    pub fn new(id: RunId, status: RunStatus, read_ids: Vec<SegmentId>) -> Self {
        Self {
            id,
            status,
            read_ids,
            annotation_number: None,
            annotated_at: None,
            written_chars: 0,
        }
    }

    pub fn is_annotated(&self) -> bool {
        self.annotation_number.is_some()
    }
}

/// A page of the serialized story. `body` is the static source markup; the
/// annotation fields only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    #[serde(default = "default_published")]
    pub published: bool,
    pub body: String,
    #[serde(default)]
    pub annotated_text: String,
    #[serde(default)]
    pub annotation_popup: String,
    /// Dash-joined contributor id combinations seen on this page.
    #[serde(default)]
    pub uids_for_css: Vec<String>,
    #[serde(default)]
    pub fully_annotated: bool,
}

fn default_published() -> bool {
    true
}

impl Book {
    pub fn new(id: BookId, body: impl Into<String>) -> Self {
        Self {
            id,
            published: true,
            body: body.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_serde_shape() {
        let seg = ReadSegment::measured(3, 7, 1_700_000_000, 420);
        let json = serde_json::to_value(seg).unwrap();
        assert_eq!(json["type"], "measured");
        assert_eq!(json["length"], 420);

        let marker: ReadSegment = serde_json::from_str(
            r#"{"id":4,"owner":9,"created":1700000100,"type":"takeover"}"#,
        )
        .unwrap();
        assert_eq!(marker.kind, SegmentKind::Takeover);
        assert_eq!(marker.length(), 0);
    }

    #[test]
    fn run_defaults_when_fields_missing() {
        let run: Run = serde_json::from_str(r#"{"id":1}"#).unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.read_ids.is_empty());
        assert!(!run.is_annotated());
        assert_eq!(run.written_chars, 0);
    }

    #[test]
    fn book_is_published_by_default() {
        let book: Book = serde_json::from_str(r#"{"id":1,"body":"<p>a</p>"}"#).unwrap();
        assert!(book.published);
        assert!(!book.fully_annotated);
        assert!(book.annotated_text.is_empty());
    }
}
