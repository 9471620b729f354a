use std::sync::Arc;

use core_types::{AnnotationNumber, BookId, Meters, RunId, Uid};
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    attributor::{AnnotationOutcome, Attributor},
    config::LedgerConfig,
    error::Result,
    math,
    store::LedgerStore,
    stylesheet,
};

/// Entry point for callers: serializes annotation passes over a shared store
/// and answers the per-book queries the presentation layer needs.
pub struct AnnotationController<S: LedgerStore> {
    config: LedgerConfig,
    store: Arc<S>,
    attributor: Attributor,
    pass_lock: Mutex<()>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunAnnotation {
    pub run_id: RunId,
    pub outcome: AnnotationOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BookProgress {
    pub book_id: BookId,
    pub total_chars: usize,
    pub annotated_chars: usize,
    pub unannotated_chars: usize,
    pub fully_annotated: bool,
}

impl<S: LedgerStore> AnnotationController<S> {
    pub fn new(store: Arc<S>, config: LedgerConfig) -> Self {
        Self {
            attributor: Attributor::new(config),
            config,
            store,
            pass_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn annotate_run(&self, run_id: RunId) -> Result<AnnotationOutcome> {
        let _guard = self.pass_lock.lock();
        let run = self.store.run(run_id)?;
        self.attributor.annotate_run(self.store.as_ref(), &run)
    }

    /// Annotates every successful, unnumbered run in id order. Stops after
    /// the first deferred run so later runs never overtake it. Runs carrying
    /// a legacy `annotated_at` are already in the text and are left to
    /// [`Self::backfill_annotation_numbers`].
    pub fn process_pending_runs(&self) -> Result<Vec<RunAnnotation>> {
        let _guard = self.pass_lock.lock();
        let pending: Vec<_> = self
            .store
            .runs()
            .into_iter()
            .filter(|run| run.status.is_success() && !run.is_annotated())
            .filter(|run| run.annotated_at.is_none())
            .collect();
        debug!("{} runs waiting for annotation", pending.len());

        let mut results = Vec::with_capacity(pending.len());
        for run in pending {
            let outcome = self.attributor.annotate_run(self.store.as_ref(), &run)?;
            let deferred = matches!(outcome, AnnotationOutcome::Deferred { .. });
            results.push(RunAnnotation {
                run_id: run.id,
                outcome,
            });
            if deferred {
                break;
            }
        }
        Ok(results)
    }

    /// Numbers successful runs that were annotated before numbering existed,
    /// oldest `annotated_at` first.
    pub fn backfill_annotation_numbers(&self) -> Result<Vec<(RunId, AnnotationNumber)>> {
        let _guard = self.pass_lock.lock();
        let mut legacy: Vec<_> = self
            .store
            .runs()
            .into_iter()
            .filter(|run| run.status.is_success() && !run.is_annotated())
            .filter(|run| run.annotated_at.is_some_and(|at| at > 1))
            .collect();
        legacy.sort_by_key(|run| (run.annotated_at, run.id));

        let mut assigned = Vec::with_capacity(legacy.len());
        for mut run in legacy {
            let number = math::next_annotation_number(self.store.as_ref());
            run.annotation_number = Some(number);
            self.store.save_run(&run)?;
            assigned.push((run.id, number));
        }
        if !assigned.is_empty() {
            info!("backfilled annotation numbers for {} runs", assigned.len());
        }
        Ok(assigned)
    }

    pub fn book_progress(&self, book_id: BookId) -> Result<BookProgress> {
        let book = self.store.book(book_id)?;
        Ok(BookProgress {
            book_id,
            total_chars: math::book_total_chars(&book),
            annotated_chars: math::book_annotated_chars(&book),
            unannotated_chars: math::book_unannotated_chars(&book)?,
            fully_annotated: book.fully_annotated,
        })
    }

    pub fn current_book_progress(&self) -> Result<Option<BookProgress>> {
        match self.store.current_book() {
            Some(book) => self.book_progress(book.id).map(Some),
            None => Ok(None),
        }
    }

    pub fn stylesheet(&self, book_id: BookId) -> Result<String> {
        let book = self.store.book(book_id)?;
        Ok(stylesheet::stylesheet(&book, &self.config))
    }

    pub fn contributors(&self, book_id: BookId) -> Result<Vec<Uid>> {
        let book = self.store.book(book_id)?;
        Ok(stylesheet::contributors(&book))
    }

    pub fn leftover_meters(&self) -> Result<Meters> {
        Ok(math::leftover_meters(
            self.store.as_ref(),
            self.attributor.accountant().meters_per_char(),
        )?)
    }
}
