//! Render descriptions handed to the presentation layer, plus a plain HTML
//! renderer.

use core_types::{Meters, RunId, Timestamp, Uid};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::accountant::SlicedAnnotation;

/// Inline element wrapping the characters paid for by one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionSpan {
    /// Raw source text, emitted verbatim.
    pub text: String,
    pub classes: Vec<String>,
    pub runner_count: usize,
    pub runner_uids: String,
    pub popup_class: String,
    pub run_ids: Vec<RunId>,
    pub uids: Vec<Uid>,
    pub times: Vec<Timestamp>,
}

impl AttributionSpan {
    pub fn for_bucket(text: impl Into<String>, bucket: &SlicedAnnotation) -> Self {
        let uids: Vec<Uid> = bucket.records.iter().map(|r| r.uid).collect();
        let runner_uids = bucket.uids_key();
        let mut classes = vec![
            "story-text".to_string(),
            format!("story-text-{}", bucket.records.len()),
            format!("story-color-{runner_uids}"),
            "colorize".to_string(),
        ];
        classes.extend(uids.iter().map(|uid| format!("story-uid-{uid}")));
        Self {
            text: text.into(),
            classes,
            runner_count: bucket.records.len(),
            runner_uids,
            popup_class: bucket.popup_class(),
            run_ids: bucket.records.iter().map(|r| r.run_id).collect(),
            uids,
            times: bucket.records.iter().map(|r| r.time).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupLine {
    pub uid: Uid,
    pub run_id: RunId,
    pub length: Meters,
    pub time: Timestamp,
    pub classes: Vec<String>,
}

/// "Who paid for this text" block, one line per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupBlock {
    pub popup_class: String,
    pub classes: Vec<String>,
    pub lines: Vec<PopupLine>,
}

impl PopupBlock {
    pub fn for_bucket(bucket: &SlicedAnnotation) -> Self {
        let popup_class = bucket.popup_class();
        let lines = bucket
            .records
            .iter()
            .map(|record| PopupLine {
                uid: record.uid,
                run_id: record.run_id,
                length: record.length,
                time: record.time,
                classes: vec![
                    "story-line".to_string(),
                    format!("story-color-{}", record.uid),
                ],
            })
            .collect();
        Self {
            classes: vec!["popup-container".to_string(), popup_class.clone()],
            popup_class,
            lines,
        }
    }
}

/// Turns render descriptions into markup. The rendered span must contain
/// `span.text` verbatim as its only visible text.
pub trait MarkupRenderer: Send + Sync {
    fn render_span(&self, span: &AttributionSpan) -> String;
    fn render_popup(&self, popup: &PopupBlock) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlRenderer;

impl MarkupRenderer for HtmlRenderer {
    fn render_span(&self, span: &AttributionSpan) -> String {
        format!(
            "<span class=\"{}\" data-story-text-runner-count=\"{}\" data-story-text-runner-uids=\"{}\" data-popup-class=\"{}\" data-run-ids=\"{}\" data-times=\"{}\">{}</span>",
            span.classes.join(" "),
            span.runner_count,
            span.runner_uids,
            span.popup_class,
            join(&span.run_ids),
            join(&span.times),
            span.text,
        )
    }

    fn render_popup(&self, popup: &PopupBlock) -> String {
        let mut out = format!("<div class=\"{}\">", popup.classes.join(" "));
        for line in &popup.lines {
            out.push_str(&format!(
                "<div class=\"{}\" data-uid=\"{}\" data-run-id=\"{}\"><span class=\"story-line-length\">{} m</span> <time datetime=\"{}\">{}</time></div>",
                line.classes.join(" "),
                line.uid,
                line.run_id,
                line.length,
                format_timestamp(line.time),
                format_timestamp(line.time),
            ));
        }
        out.push_str("</div>");
        out
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("-")
}

pub fn format_timestamp(ts: Timestamp) -> String {
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| format!("{ts}"))
}
