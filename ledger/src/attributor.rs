//! Writes sliced buckets into the current book as attribution markup.
//!
//! One pass per book: the body is parsed, walked in document order up to the
//! character where earlier passes stopped, and the buckets are consumed
//! against the text that follows. The new markup and popup blocks are
//! appended to the book's accumulated fields; nothing is ever rewritten.

use std::{
    collections::{HashSet, VecDeque},
    sync::LazyLock,
};

use core_types::{AnnotationNumber, Book, BookId, Run};
use log::{debug, error, info, warn};
use regex::Regex;

use crate::{
    accountant::{Accountant, SlicedAnnotation},
    config::LedgerConfig,
    document::{DocNode, DocumentParser, FragmentParser},
    error::{IntegrityError, LedgerError, Result},
    math,
    render::{AttributionSpan, HtmlRenderer, MarkupRenderer, PopupBlock},
    store::LedgerStore,
};

static POPUP_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"popup-run-[0-9a-z-]+").expect("valid popup key pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationOutcome {
    /// The run did not succeed or already carries a number.
    Skipped,
    /// No open book; `pending` characters stay queued and the run keeps no
    /// number so the next invocation picks it up again.
    Deferred { pending: usize },
    Annotated {
        annotation_number: AnnotationNumber,
        books: Vec<BookId>,
        chars: usize,
    },
}

/// Mutable state of a single book pass.
struct PassContext<'q> {
    /// Annotated characters when the pass began.
    pass_start: usize,
    /// Annotated characters so far, advanced as buckets are consumed.
    start: usize,
    /// Visible characters in the body.
    total: usize,
    position: usize,
    /// Set once the walk reaches the point where the previous pass stopped.
    resumed: bool,
    node_text: String,
    markup: String,
    popup: String,
    popup_keys: HashSet<String>,
    uids_for_css: Vec<String>,
    consumed: usize,
    buckets: &'q mut VecDeque<SlicedAnnotation>,
}

impl<'q> PassContext<'q> {
    fn new(
        start: usize,
        total: usize,
        book: &Book,
        buckets: &'q mut VecDeque<SlicedAnnotation>,
    ) -> Self {
        let popup_keys = POPUP_KEY_RE
            .find_iter(&book.annotation_popup)
            .map(|m| m.as_str().to_string())
            .collect();
        let mut uids_for_css: Vec<String> = Vec::with_capacity(book.uids_for_css.len());
        for uids in &book.uids_for_css {
            if !uids_for_css.contains(uids) {
                uids_for_css.push(uids.clone());
            }
        }
        Self {
            pass_start: start,
            start,
            total,
            position: 0,
            resumed: false,
            node_text: String::new(),
            markup: String::new(),
            popup: String::new(),
            popup_keys,
            uids_for_css,
            consumed: 0,
            buckets,
        }
    }

    /// The pass is done with text but the body is not: everything from here
    /// on belongs to a later pass.
    fn stopped(&self) -> bool {
        self.buckets.is_empty() && self.start < self.total
    }

    /// Tags at the cursor are written by this pass. Once the last character
    /// is written, the trailing tags of the body follow it.
    fn writing(&self) -> bool {
        !self.buckets.is_empty() || self.start == self.total
    }
}

pub struct Attributor<P = FragmentParser, R = HtmlRenderer> {
    accountant: Accountant,
    parser: P,
    renderer: R,
}

impl Attributor {
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_components(config, FragmentParser, HtmlRenderer)
    }
}

impl<P: DocumentParser, R: MarkupRenderer> Attributor<P, R> {
    pub fn with_components(config: LedgerConfig, parser: P, renderer: R) -> Self {
        Self {
            accountant: Accountant::new(config.meters_per_char),
            parser,
            renderer,
        }
    }

    pub fn accountant(&self) -> &Accountant {
        &self.accountant
    }

    /// Writes `run` into the open books and numbers it.
    ///
    /// Each book is saved as soon as its pass completes, together with the
    /// run's `written_chars`, so a run deferred or aborted part way resumes
    /// after the characters it already wrote. The number is assigned last.
    /// An integrity fault aborts before the offending book is saved.
    pub fn annotate_run<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        run: &Run,
    ) -> Result<AnnotationOutcome> {
        if run.is_annotated() {
            debug!(
                "[run {}] already annotated as #{:?}",
                run.id, run.annotation_number
            );
            return Ok(AnnotationOutcome::Skipped);
        }
        let Some(outcome) = self.accountant.annotate_run(store, run)? else {
            return Ok(AnnotationOutcome::Skipped);
        };

        let mut buckets: VecDeque<SlicedAnnotation> = outcome.buckets.into();
        let mut progress = run.clone();
        if progress.written_chars > 0 {
            info!(
                "[run {}] resuming after {} chars already written",
                run.id, progress.written_chars
            );
            skip_written(&mut buckets, progress.written_chars);
        }
        let mut books = Vec::new();
        let mut chars = 0;

        while !buckets.is_empty() {
            let Some(mut book) = store.current_book() else {
                let pending = buckets.iter().map(|b| b.chars).sum();
                warn!(
                    "[run {}] no open book, {} chars deferred",
                    run.id, pending
                );
                return Ok(AnnotationOutcome::Deferred { pending });
            };
            let consumed = self.annotate_book(&mut book, &mut buckets).inspect_err(|err| {
                error!("[run {}] [book {}] pass aborted: {err}", run.id, book.id);
            })?;
            store.save_book(&book)?;
            progress.written_chars += consumed;
            store.save_run(&progress)?;
            chars += consumed;
            books.push(book.id);
        }

        let annotation_number = math::next_annotation_number(store);
        progress.annotation_number = Some(annotation_number);
        store.save_run(&progress)?;
        info!(
            "[run {}] annotated as #{} ({} chars over {} books)",
            run.id,
            annotation_number,
            chars,
            books.len()
        );
        Ok(AnnotationOutcome::Annotated {
            annotation_number,
            books,
            chars,
        })
    }

    /// Consumes buckets against `book` and returns the characters written.
    /// The book is mutated in place; saving is left to the caller.
    pub fn annotate_book(
        &self,
        book: &mut Book,
        buckets: &mut VecDeque<SlicedAnnotation>,
    ) -> Result<usize> {
        let start = math::book_annotated_chars(book);
        let total = math::book_total_chars(book);
        let remaining = math::book_unannotated_chars(book)?;
        if remaining == 0 {
            info!("[book {}] nothing left to annotate, closing", book.id);
            book.fully_annotated = true;
            return Ok(0);
        }

        let document = self
            .parser
            .parse(&book.body)
            .map_err(|source| LedgerError::Document {
                book_id: book.id,
                source,
            })?;

        let mut ctx = PassContext::new(start, total, book, buckets);
        self.walk(&mut ctx, &document.nodes);

        let emitted = math::char_count(&ctx.markup);
        if emitted != ctx.consumed {
            return Err(IntegrityError::MarkupDrift {
                book_id: book.id,
                consumed: ctx.consumed,
                emitted,
            }
            .into());
        }
        if ctx.consumed == 0 {
            return Err(IntegrityError::Stalled {
                book_id: book.id,
                start,
                remaining,
            }
            .into());
        }

        let PassContext {
            markup,
            popup,
            uids_for_css,
            consumed,
            ..
        } = ctx;
        book.annotated_text.push_str(&markup);
        book.annotation_popup.push_str(&popup);
        book.uids_for_css = uids_for_css;

        let left = math::book_unannotated_chars(book)?;
        debug!(
            "[book {}] pass from char {} consumed {} chars, {} left",
            book.id, start, consumed, left
        );
        if left == 0 {
            self.parser
                .parse(&book.annotated_text)
                .map_err(|source| IntegrityError::UnbalancedMarkup {
                    book_id: book.id,
                    source,
                })?;
            info!("[book {}] fully annotated", book.id);
            book.fully_annotated = true;
        }
        Ok(consumed)
    }

    /// Depth-first walk; returns `false` once the pass has stopped inside
    /// `nodes`, which leaves every enclosing element open. A pass that
    /// reaches the end of the text walks on to close the body.
    fn walk(&self, ctx: &mut PassContext<'_>, nodes: &[DocNode]) -> bool {
        for node in nodes {
            if ctx.position >= ctx.pass_start {
                ctx.resumed = true;
            }
            if ctx.position >= ctx.start && ctx.stopped() {
                return false;
            }
            match node {
                DocNode::Text(text) => self.visit_text(ctx, text),
                DocNode::Element(element) => {
                    if ctx.position == ctx.start && ctx.writing() {
                        ctx.markup.push_str(&element.open_tag());
                    }
                    if element.is_void() {
                        continue;
                    }
                    if !self.walk(ctx, &element.children) {
                        return false;
                    }
                    // an element that ended before the resume point was
                    // closed by an earlier pass
                    if ctx.resumed && ctx.position == ctx.start && ctx.node_text.is_empty() {
                        ctx.markup.push_str(&element.close_tag());
                    }
                }
            }
        }
        true
    }

    fn visit_text(&self, ctx: &mut PassContext<'_>, raw: &str) {
        let text = math::remove_tags_and_newlines(raw);
        let len = math::visible_len(&text);
        if ctx.position <= ctx.start && ctx.position + len > ctx.start {
            ctx.resumed = true;
            let skip = ctx.start - ctx.position;
            ctx.node_text = math::split_visible(&text, skip).1.to_string();
            ctx.position = ctx.start;
            self.consume(ctx);
        } else {
            ctx.node_text.clear();
            ctx.position += len;
        }
    }

    /// Wraps the pending node text bucket by bucket. A bucket wider than the
    /// text left in the node is split; the rest continues in the next text
    /// node under the same popup class.
    fn consume(&self, ctx: &mut PassContext<'_>) {
        while !ctx.node_text.is_empty() {
            let Some(mut bucket) = ctx.buckets.pop_front() else {
                break;
            };
            let available = math::visible_len(&ctx.node_text);
            if bucket.chars > available {
                ctx.buckets.push_front(SlicedAnnotation {
                    records: bucket.records.clone(),
                    chars: bucket.chars - available,
                });
                bucket.chars = available;
            }

            let (taken, rest) = math::split_visible(&ctx.node_text, bucket.chars);
            let span = AttributionSpan::for_bucket(taken, &bucket);
            let rest = rest.to_string();
            ctx.markup.push_str(&self.renderer.render_span(&span));
            if ctx.popup_keys.insert(span.popup_class.clone()) {
                let popup = PopupBlock::for_bucket(&bucket);
                ctx.popup.push_str(&self.renderer.render_popup(&popup));
            }
            if !ctx.uids_for_css.contains(&span.runner_uids) {
                ctx.uids_for_css.push(span.runner_uids);
            }

            ctx.node_text = rest;
            ctx.position += bucket.chars;
            ctx.start += bucket.chars;
            ctx.consumed += bucket.chars;
        }
    }
}

/// Drops the first `chars` characters of the queue, shortening the bucket
/// that straddles the boundary.
fn skip_written(buckets: &mut VecDeque<SlicedAnnotation>, mut chars: usize) {
    while chars > 0 {
        let Some(front) = buckets.front_mut() else {
            break;
        };
        if front.chars <= chars {
            chars -= front.chars;
            buckets.pop_front();
        } else {
            front.chars -= chars;
            chars = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::Document,
        error::DocumentError,
        store::MemoryStore,
    };
    use core_types::{ReadSegment, RunStatus};

    fn store_with_books(bodies: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for (idx, body) in bodies.iter().enumerate() {
            store.insert_book(Book::new(idx as u64 + 1, *body));
        }
        store
    }

    /// Adds a single-owner run of `meters` and returns it.
    fn add_run(store: &MemoryStore, run_id: u64, owner: u64, meters: u64) -> Run {
        let segment_id = run_id * 100;
        store.insert_segment(ReadSegment::measured(segment_id, owner, run_id as i64 * 60, meters));
        let run = Run::new(run_id, RunStatus::Success, vec![segment_id]);
        store.insert_run(run.clone());
        run
    }

    fn bucket(chars: usize) -> SlicedAnnotation {
        SlicedAnnotation {
            records: vec![],
            chars,
        }
    }

    #[test]
    fn skip_written_shortens_the_straddling_bucket() {
        let mut buckets: VecDeque<_> = vec![bucket(2), bucket(3), bucket(1)].into();
        skip_written(&mut buckets, 3);
        let chars: Vec<usize> = buckets.iter().map(|b| b.chars).collect();
        assert_eq!(chars, vec![2, 1]);

        skip_written(&mut buckets, 10);
        assert!(buckets.is_empty());
    }

    #[test]
    fn first_pass_leaves_partial_paragraph_open() {
        let store = store_with_books(&["<p>abcd</p>"]);
        let run = add_run(&store, 1, 7, 2500);
        let attributor = Attributor::new(LedgerConfig::default());

        let outcome = attributor.annotate_run(&store, &run).unwrap();
        assert_eq!(
            outcome,
            AnnotationOutcome::Annotated {
                annotation_number: 1,
                books: vec![1],
                chars: 2
            }
        );
        let book = store.book(1).unwrap();
        assert!(book.annotated_text.starts_with("<p><span"));
        assert!(!book.annotated_text.contains("</p>"));
        assert_eq!(math::remove_tags_and_newlines(&book.annotated_text), "ab");
        assert_eq!(book.uids_for_css, vec!["7"]);
        assert!(!book.fully_annotated);
        assert_eq!(store.run(1).unwrap().annotation_number, Some(1));
    }

    #[test]
    fn resumed_pass_closes_what_it_finishes() {
        let store = store_with_books(&["<p>ab<br>cd</p>"]);
        let attributor = Attributor::new(LedgerConfig::default());
        let first = add_run(&store, 1, 1, 2000);
        attributor.annotate_run(&store, &first).unwrap();
        let second = add_run(&store, 2, 2, 2000);
        attributor.annotate_run(&store, &second).unwrap();

        let book = store.book(1).unwrap();
        assert!(book.fully_annotated);
        assert_eq!(book.annotated_text.matches("<br />").count(), 1);
        assert_eq!(book.annotated_text.matches("</p>").count(), 1);
        assert!(book.annotated_text.ends_with("</span></p>"));
        assert!(FragmentParser.parse(&book.annotated_text).is_ok());
    }

    #[test]
    fn character_references_are_one_char_and_never_split() {
        let store = store_with_books(&["<p>AT&amp;T&nbsp;</p>"]);
        let attributor = Attributor::new(LedgerConfig::default());
        assert_eq!(math::book_total_chars(&store.book(1).unwrap()), 5);

        let first = add_run(&store, 1, 1, 3000);
        attributor.annotate_run(&store, &first).unwrap();
        let book = store.book(1).unwrap();
        assert!(book.annotated_text.ends_with(">AT&amp;</span>"));
        assert_eq!(math::book_annotated_chars(&book), 3);

        let second = add_run(&store, 2, 2, 2000);
        attributor.annotate_run(&store, &second).unwrap();
        let book = store.book(1).unwrap();
        assert!(book.fully_annotated);
        assert!(book.annotated_text.contains(">T&nbsp;</span></p>"));
        let stripped = Regex::new(r"</?span[^>]*>").unwrap();
        assert_eq!(
            stripped.replace_all(&book.annotated_text, "").as_ref(),
            book.body.as_str()
        );
    }

    #[test]
    fn finishing_pass_writes_trailing_tags() {
        let store = store_with_books(&["<p>ab<br></p>", "<div><p>c</p><hr><p></p></div>"]);
        let attributor = Attributor::new(LedgerConfig::default());
        let run = add_run(&store, 1, 1, 3000);
        attributor.annotate_run(&store, &run).unwrap();

        let first = store.book(1).unwrap();
        assert!(first.fully_annotated);
        assert!(first.annotated_text.ends_with("</span><br /></p>"));
        assert!(FragmentParser.parse(&first.annotated_text).is_ok());

        let second = store.book(2).unwrap();
        assert!(second.fully_annotated);
        assert!(second.annotated_text.ends_with("</span></p><hr /><p></p></div>"));
        assert!(FragmentParser.parse(&second.annotated_text).is_ok());
    }

    #[test]
    fn deferred_run_resumes_after_written_chars() {
        let store = store_with_books(&["<p>ab</p>"]);
        let attributor = Attributor::new(LedgerConfig::default());
        let run = add_run(&store, 1, 1, 3000);

        let outcome = attributor.annotate_run(&store, &run).unwrap();
        assert_eq!(outcome, AnnotationOutcome::Deferred { pending: 1 });
        let saved = store.run(1).unwrap();
        assert_eq!(saved.written_chars, 2);
        assert!(!saved.is_annotated());

        store.insert_book(Book::new(2, "<p>cd</p>"));
        let outcome = attributor.annotate_run(&store, &saved).unwrap();
        assert_eq!(
            outcome,
            AnnotationOutcome::Annotated {
                annotation_number: 1,
                books: vec![2],
                chars: 1
            }
        );
        let written: usize = store.books().iter().map(math::book_annotated_chars).sum();
        assert_eq!(written, 3);
        assert_eq!(math::book_annotated_chars(&store.book(2).unwrap()), 1);
    }

    #[test]
    fn wide_bucket_splits_across_text_nodes() {
        let store = store_with_books(&["<p>a<em>bc</em></p>"]);
        let run = add_run(&store, 1, 4, 3000);
        Attributor::new(LedgerConfig::default())
            .annotate_run(&store, &run)
            .unwrap();

        let book = store.book(1).unwrap();
        assert_eq!(book.annotated_text.matches("<span ").count(), 2);
        assert_eq!(book.annotation_popup.matches("popup-container").count(), 1);
        assert!(book.annotated_text.contains("<em><span"));
        assert!(book.annotated_text.ends_with("</em></p>"));
    }

    #[test]
    fn known_popup_keys_are_not_repeated() {
        let store = MemoryStore::new();
        let mut book = Book::new(1, "<p>abcdef</p>");
        book.annotated_text = "<p>ab".to_string();
        book.annotation_popup =
            "<div class=\"popup-container popup-run-1-uid-4-time-60\"></div>".to_string();
        book.uids_for_css = vec!["4".to_string(), "4".to_string()];
        store.insert_book(book);
        let mut earlier = Run::new(9, RunStatus::Success, vec![]);
        earlier.annotation_number = Some(1);
        store.insert_run(earlier);

        // same run id, owner and time as the existing popup
        store.insert_segment(ReadSegment::measured(100, 4, 60, 2000));
        let run = Run::new(1, RunStatus::Success, vec![100]);
        store.insert_run(run.clone());
        Attributor::new(LedgerConfig::default())
            .annotate_run(&store, &run)
            .unwrap();

        let book = store.book(1).unwrap();
        assert_eq!(book.annotation_popup.matches("popup-container").count(), 1);
        assert_eq!(book.uids_for_css, vec!["4"]);
        assert_eq!(math::book_annotated_chars(&book), 4);
    }

    #[test]
    fn no_open_book_defers_without_numbering() {
        let store = MemoryStore::new();
        let run = add_run(&store, 1, 1, 2000);
        let outcome = Attributor::new(LedgerConfig::default())
            .annotate_run(&store, &run)
            .unwrap();
        assert_eq!(outcome, AnnotationOutcome::Deferred { pending: 2 });
        assert!(!store.run(1).unwrap().is_annotated());
    }

    #[test]
    fn failed_and_numbered_runs_are_skipped() {
        let store = store_with_books(&["<p>ab</p>"]);
        let failed = Run::new(1, RunStatus::Failed, vec![]);
        store.insert_run(failed.clone());
        let attributor = Attributor::new(LedgerConfig::default());
        assert_eq!(
            attributor.annotate_run(&store, &failed).unwrap(),
            AnnotationOutcome::Skipped
        );

        let mut numbered = add_run(&store, 2, 1, 1000);
        numbered.annotation_number = Some(3);
        assert_eq!(
            attributor.annotate_run(&store, &numbered).unwrap(),
            AnnotationOutcome::Skipped
        );
        assert!(store.book(1).unwrap().annotated_text.is_empty());
    }

    #[test]
    fn short_run_is_numbered_without_text() {
        let store = store_with_books(&["<p>ab</p>"]);
        let run = add_run(&store, 1, 1, 400);
        let outcome = Attributor::new(LedgerConfig::default())
            .annotate_run(&store, &run)
            .unwrap();
        assert_eq!(
            outcome,
            AnnotationOutcome::Annotated {
                annotation_number: 1,
                books: vec![],
                chars: 0
            }
        );
    }

    #[test]
    fn overrun_aborts_before_save() {
        let store = MemoryStore::new();
        let mut book = Book::new(1, "<p>ab</p>");
        book.annotated_text = "<p>abc</p>".to_string();
        store.insert_book(book.clone());
        let run = add_run(&store, 1, 1, 1000);

        let err = Attributor::new(LedgerConfig::default())
            .annotate_run(&store, &run)
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Integrity(IntegrityError::CursorOverrun { book_id: 1, .. })
        ));
        assert_eq!(store.book(1).unwrap(), book);
        assert!(!store.run(1).unwrap().is_annotated());
    }

    struct BlankParser;

    impl DocumentParser for BlankParser {
        fn parse(&self, _markup: &str) -> std::result::Result<Document, DocumentError> {
            Ok(Document::default())
        }
    }

    struct TextlessRenderer;

    impl MarkupRenderer for TextlessRenderer {
        fn render_span(&self, span: &AttributionSpan) -> String {
            format!("<span class=\"{}\"></span>", span.classes.join(" "))
        }

        fn render_popup(&self, _popup: &PopupBlock) -> String {
            String::new()
        }
    }

    /// Parses bodies but rejects any annotated text.
    struct BodyOnlyParser;

    impl DocumentParser for BodyOnlyParser {
        fn parse(&self, markup: &str) -> std::result::Result<Document, DocumentError> {
            if markup.contains("<span") {
                return Err(DocumentError::Unclosed {
                    name: "span".to_string(),
                });
            }
            FragmentParser.parse(markup)
        }
    }

    #[test]
    fn unparsable_finished_markup_aborts_before_save() {
        let store = store_with_books(&["<p>ab</p>"]);
        let run = add_run(&store, 1, 1, 2000);
        let attributor =
            Attributor::with_components(LedgerConfig::default(), BodyOnlyParser, HtmlRenderer);
        let err = attributor.annotate_run(&store, &run).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Integrity(IntegrityError::UnbalancedMarkup { book_id: 1, .. })
        ));
        let book = store.book(1).unwrap();
        assert!(book.annotated_text.is_empty());
        assert!(!book.fully_annotated);
    }

    #[test]
    fn pass_that_finds_no_text_is_stalled() {
        let store = store_with_books(&["<p>ab</p>"]);
        let run = add_run(&store, 1, 1, 1000);
        let attributor =
            Attributor::with_components(LedgerConfig::default(), BlankParser, HtmlRenderer);
        let err = attributor.annotate_run(&store, &run).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Integrity(IntegrityError::Stalled {
                book_id: 1,
                start: 0,
                remaining: 2
            })
        ));
    }

    #[test]
    fn renderer_that_drops_text_is_drift() {
        let store = store_with_books(&["<p>ab</p>"]);
        let run = add_run(&store, 1, 1, 1000);
        let attributor =
            Attributor::with_components(LedgerConfig::default(), FragmentParser, TextlessRenderer);
        let err = attributor.annotate_run(&store, &run).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Integrity(IntegrityError::MarkupDrift {
                consumed: 1,
                emitted: 0,
                ..
            })
        ));
        assert!(store.book(1).unwrap().annotated_text.is_empty());
    }

    #[test]
    fn malformed_body_is_a_document_error() {
        let store = store_with_books(&["<p>ab</div>"]);
        let run = add_run(&store, 1, 1, 1000);
        let err = Attributor::new(LedgerConfig::default())
            .annotate_run(&store, &run)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Document { book_id: 1, .. }));
    }
}
