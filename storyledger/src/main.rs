mod config;

use std::{env, process, sync::Arc};

use crate::config::{Command, ConfigError, RuntimeConfig};
use ledger::{
    AnnotationController, AnnotationOutcome, BookProgress, LedgerError, MemoryStore, RunAnnotation,
    StoreError,
};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

fn main() {
    if let Err(err) = run() {
        eprintln!("storyledger failed: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let command = Command::from_args(env::args().skip(1))?;
    let config = RuntimeConfig::load()?;

    let store = Arc::new(MemoryStore::load_or_init(&config.snapshot_path)?);
    let controller = AnnotationController::new(store, config.ledger);
    log::debug!(
        "storyledger {:?} at {} against {}",
        command,
        now_label(),
        config.snapshot_path.display()
    );

    match command {
        Command::Process => {
            let results = controller.process_pending_runs()?;
            if results.is_empty() {
                println!("No runs waiting for annotation.");
            }
            for result in &results {
                println!("{}", describe_run(result));
            }
        }
        Command::Backfill => {
            let assigned = controller.backfill_annotation_numbers()?;
            println!("Backfilled {} annotation numbers", assigned.len());
            for (run_id, number) in assigned {
                println!("  run {run_id} -> #{number}");
            }
        }
        Command::Status => {
            match controller.current_book_progress()? {
                Some(progress) => println!("Current book: {}", describe_progress(&progress)),
                None => println!("No open book; new runs will be deferred."),
            }
            println!(
                "Leftover: {} m of {} m per char",
                controller.leftover_meters()?,
                controller.config().meters_per_char
            );
        }
        Command::Css(book_id) => print!("{}", controller.stylesheet(book_id)?),
        Command::Contributors(book_id) => {
            let ids = controller
                .contributors(book_id)?
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            println!("{}", ids.join(","));
        }
    }

    if command.mutates() {
        controller.store().persist(&config.snapshot_path)?;
        println!("Ledger snapshot written to {}", config.snapshot_path.display());
    }
    Ok(())
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn describe_run(result: &RunAnnotation) -> String {
    match &result.outcome {
        AnnotationOutcome::Skipped => format!("run {}: skipped", result.run_id),
        AnnotationOutcome::Deferred { pending } => format!(
            "run {}: deferred, {} chars waiting for a book",
            result.run_id, pending
        ),
        AnnotationOutcome::Annotated {
            annotation_number,
            books,
            chars,
        } => {
            let books = books
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "run {}: annotation #{} wrote {} chars (books: {})",
                result.run_id,
                annotation_number,
                chars,
                if books.is_empty() { "none" } else { books.as_str() }
            )
        }
    }
}

fn describe_progress(progress: &BookProgress) -> String {
    format!(
        "book {} at {}/{} chars ({} left)",
        progress.book_id, progress.annotated_chars, progress.total_chars, progress.unannotated_chars
    )
}

fn now_label() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown time".to_string())
}
