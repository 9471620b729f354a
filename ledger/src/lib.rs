//! Annotation ledger: turns distance-based runs into attributed book text.
//!
//! The crate exposes:
//! - [`AnnotationController`]: serialized entry point over a [`LedgerStore`].
//! - [`Accountant`]: per-owner records and character-sized buckets for a run.
//! - [`Attributor`]: writes buckets into the current book as attribution markup.
//! - [`MemoryStore`]: in-process store with a JSON snapshot.

pub mod accountant;
pub mod attributor;
pub mod config;
pub mod controller;
pub mod document;
pub mod error;
pub mod math;
pub mod render;
pub mod store;
pub mod stylesheet;

pub use accountant::{Accountant, AnnotationRecord, RecordSpan, SliceOutcome, SlicedAnnotation};
pub use attributor::{AnnotationOutcome, Attributor};
pub use config::LedgerConfig;
pub use controller::{AnnotationController, BookProgress, RunAnnotation};
pub use document::{DocNode, Document, DocumentParser, Element, FragmentParser};
pub use error::{DocumentError, IntegrityError, LedgerError, StoreError};
pub use render::{AttributionSpan, HtmlRenderer, MarkupRenderer, PopupBlock, PopupLine};
pub use store::{LedgerStore, MemoryStore, Snapshot};
