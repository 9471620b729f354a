//! Ledger arithmetic shared by the accountant and the attributor.
//!
//! Character positions are counted in visible characters over text with
//! markup and line breaks removed: one per Unicode scalar value, except that a
//! character reference (`&amp;`, `&#233;`, `&#x2014;`) is a single character.
//! Both `body` and `annotated_text` go through [`char_count`] so the two sides
//! of the cursor agree.

use std::{num::NonZeroU64, sync::LazyLock};

use core_types::{AnnotationNumber, Book, Meters, Uid};
use regex::Regex;

use crate::{
    error::{IntegrityError, StoreError},
    store::LedgerStore,
};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->|<[^>]*>").expect("valid tag pattern"));

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:[A-Za-z][A-Za-z0-9]*|#[0-9]+|#[xX][0-9A-Fa-f]+);")
        .expect("valid entity pattern")
});

const HASH_MULTIPLIER: u128 = 83_682_354_363_539;
const HASH_MODULUS: u128 = 37_634_541_363_577;
const HASH_BUCKETS: u128 = 4095;
const HUE_SCALE: f64 = 0.0878;

pub fn remove_tags_and_newlines(text: &str) -> String {
    TAG_RE
        .replace_all(text, "")
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .collect()
}

/// Source slices of `text`, one per visible character.
pub fn visible_chars(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let len = match first {
            '&' => ENTITY_RE.find(rest).map_or(1, |m| m.end()),
            other => other.len_utf8(),
        };
        let (unit, tail) = rest.split_at(len);
        rest = tail;
        Some(unit)
    })
}

/// Visible characters of tag-free text.
pub fn visible_len(text: &str) -> usize {
    visible_chars(text).count()
}

/// Splits tag-free text after `n` visible characters. Never cuts inside a
/// character reference.
pub fn split_visible(text: &str, n: usize) -> (&str, &str) {
    let idx = visible_chars(text).take(n).map(str::len).sum();
    text.split_at(idx)
}

/// Visible characters of a markup fragment.
pub fn char_count(markup: &str) -> usize {
    visible_len(&remove_tags_and_newlines(markup))
}

pub fn book_total_chars(book: &Book) -> usize {
    char_count(&book.body)
}

pub fn book_annotated_chars(book: &Book) -> usize {
    if book.annotated_text.is_empty() {
        return 0;
    }
    char_count(&book.annotated_text)
}

pub fn book_unannotated_chars(book: &Book) -> Result<usize, IntegrityError> {
    let total = book_total_chars(book);
    let annotated = book_annotated_chars(book);
    total
        .checked_sub(annotated)
        .ok_or(IntegrityError::CursorOverrun {
            book_id: book.id,
            annotated,
            total,
        })
}

/// Total distance of every run already written into the book, including the
/// tail of the last one that has not become a whole character yet.
pub fn annotated_runs_total_length<S: LedgerStore + ?Sized>(
    store: &S,
) -> Result<Meters, StoreError> {
    store
        .annotated_runs()
        .iter()
        .map(|run| store.run_length(run))
        .sum()
}

pub fn leftover_meters<S: LedgerStore + ?Sized>(
    store: &S,
    meters_per_char: NonZeroU64,
) -> Result<Meters, StoreError> {
    Ok(annotated_runs_total_length(store)? % meters_per_char)
}

pub fn next_annotation_number<S: LedgerStore + ?Sized>(store: &S) -> AnnotationNumber {
    store.highest_annotation_number() + 1
}

/// Deterministic hue in `0..=359` spread over contributor ids.
pub fn integer_to_hue(i: Uid) -> u32 {
    let hash = (HASH_MULTIPLIER * i as u128) % HASH_MODULUS % HASH_BUCKETS;
    (hash as f64 * HUE_SCALE).floor() as u32
}

pub fn integer_to_color(i: Uid, saturation: u8, lightness: u8) -> String {
    format!("hsl({}, {}%, {}%)", integer_to_hue(i), saturation, lightness)
}

pub fn integer_to_random_color(i: Uid) -> String {
    integer_to_color(i, 100, 80)
}
