use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use core_types::{AnnotationNumber, Book, BookId, Meters, ReadSegment, Run, RunId, SegmentId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Contract with whatever persists runs and books.
///
/// Implementations are expected to be serialized externally: the core assumes
/// a single annotation pass at a time.
pub trait LedgerStore: Send + Sync {
    fn run(&self, run_id: RunId) -> Result<Run, StoreError>;

    /// Every known run in ascending id order.
    fn runs(&self) -> Vec<Run>;

    fn run_length(&self, run: &Run) -> Result<Meters, StoreError>;

    /// Read ids of `run` in recording order.
    fn valid_read_ids(&self, run: &Run) -> Vec<SegmentId>;

    fn segment(&self, segment_id: SegmentId) -> Option<ReadSegment>;

    /// Successful runs that already carry an annotation number, ordered by
    /// that number.
    fn annotated_runs(&self) -> Vec<Run>;

    /// Oldest published page that is not fully annotated.
    fn current_book(&self) -> Option<Book>;

    fn book(&self, book_id: BookId) -> Result<Book, StoreError>;

    fn save_book(&self, book: &Book) -> Result<(), StoreError>;

    fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    fn segments_for_run(&self, run: &Run) -> Result<Vec<ReadSegment>, StoreError> {
        self.valid_read_ids(run)
            .into_iter()
            .map(|segment_id| {
                self.segment(segment_id).ok_or(StoreError::MissingSegment {
                    run_id: run.id,
                    segment_id,
                })
            })
            .collect()
    }

    fn highest_annotation_number(&self) -> AnnotationNumber {
        self.annotated_runs()
            .iter()
            .filter_map(|run| run.annotation_number)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub runs: Vec<Run>,
    #[serde(default)]
    pub segments: Vec<ReadSegment>,
    #[serde(default)]
    pub books: Vec<Book>,
}

#[derive(Debug, Default)]
struct MemoryState {
    runs: BTreeMap<RunId, Run>,
    segments: BTreeMap<SegmentId, ReadSegment>,
    books: BTreeMap<BookId, Book>,
}

/// In-process store used by tests and the command line driver.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            state.runs = snapshot.runs.into_iter().map(|r| (r.id, r)).collect();
            state.segments = snapshot.segments.into_iter().map(|s| (s.id, s)).collect();
            state.books = snapshot.books.into_iter().map(|b| (b.id, b)).collect();
        }
        store
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            runs: state.runs.values().cloned().collect(),
            segments: state.segments.values().cloned().collect(),
            books: state.books.values().cloned().collect(),
        }
    }

    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        let snapshot = serde_json::from_slice::<Snapshot>(&bytes).map_err(|source| {
            StoreError::Snapshot {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let bytes = serde_json::to_vec_pretty(&self.snapshot()).map_err(|source| {
            StoreError::Snapshot {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, bytes)?;
        Ok(())
    }

    pub fn insert_run(&self, run: Run) {
        self.state.write().runs.insert(run.id, run);
    }

    pub fn insert_segment(&self, segment: ReadSegment) {
        self.state.write().segments.insert(segment.id, segment);
    }

    pub fn insert_book(&self, book: Book) {
        self.state.write().books.insert(book.id, book);
    }

    pub fn books(&self) -> Vec<Book> {
        self.state.read().books.values().cloned().collect()
    }
}

impl LedgerStore for MemoryStore {
    fn run(&self, run_id: RunId) -> Result<Run, StoreError> {
        self.state
            .read()
            .runs
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::MissingRun { run_id })
    }

    fn runs(&self) -> Vec<Run> {
        self.state.read().runs.values().cloned().collect()
    }

    fn run_length(&self, run: &Run) -> Result<Meters, StoreError> {
        Ok(self
            .segments_for_run(run)?
            .iter()
            .map(ReadSegment::length)
            .sum())
    }

    fn valid_read_ids(&self, run: &Run) -> Vec<SegmentId> {
        let state = self.state.read();
        run.read_ids
            .iter()
            .copied()
            .filter(|id| state.segments.contains_key(id))
            .collect()
    }

    fn segment(&self, segment_id: SegmentId) -> Option<ReadSegment> {
        self.state.read().segments.get(&segment_id).copied()
    }

    fn annotated_runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .state
            .read()
            .runs
            .values()
            .filter(|run| run.status.is_success() && run.annotation_number.is_some())
            .cloned()
            .collect();
        runs.sort_by_key(|run| (run.annotation_number, run.id));
        runs
    }

    fn current_book(&self) -> Option<Book> {
        self.state
            .read()
            .books
            .values()
            .find(|book| book.published && !book.fully_annotated)
            .cloned()
    }

    fn book(&self, book_id: BookId) -> Result<Book, StoreError> {
        self.state
            .read()
            .books
            .get(&book_id)
            .cloned()
            .ok_or(StoreError::MissingBook { book_id })
    }

    fn save_book(&self, book: &Book) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let slot = state
            .books
            .get_mut(&book.id)
            .ok_or(StoreError::MissingBook { book_id: book.id })?;
        *slot = book.clone();
        Ok(())
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let slot = state
            .runs
            .get_mut(&run.id)
            .ok_or(StoreError::MissingRun { run_id: run.id })?;
        *slot = run.clone();
        Ok(())
    }
}
