// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared identifiers, run/book records and configuration for the story ledger.

pub mod config;
pub mod types;

pub use config::{AnnotationSettings, AppConfig};
pub use types::{
    AnnotationNumber, Book, BookId, Meters, ReadSegment, Run, RunId, RunStatus, SegmentId,
    SegmentKind, Timestamp, Uid,
};
