//! Converts runs into per-owner distance records and packs those records into
//! character-sized buckets.

use std::num::NonZeroU64;

use core_types::{Meters, ReadSegment, Run, RunId, SegmentKind, Timestamp, Uid};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{error::StoreError, math, store::LedgerStore};

/// One contiguous stretch of a single owner's contribution, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub uid: Uid,
    pub run_id: RunId,
    pub time: Timestamp,
    pub length: Meters,
}

impl AnnotationRecord {
    fn unowned(run_id: RunId) -> Self {
        Self {
            uid: 0,
            run_id,
            time: 0,
            length: 0,
        }
    }
}

/// Records worth `chars` whole characters of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicedAnnotation {
    pub records: Vec<AnnotationRecord>,
    pub chars: usize,
}

impl SlicedAnnotation {
    pub fn meters(&self) -> Meters {
        self.records.iter().map(|r| r.length).sum()
    }

    /// Dash-joined owner ids, the key used for contributor colouring.
    pub fn uids_key(&self) -> String {
        join_dashed(self.records.iter().map(|r| r.uid))
    }

    /// Class shared by an attribution span and its popup block.
    pub fn popup_class(&self) -> String {
        format!(
            "popup-run-{}-uid-{}-time-{}",
            join_dashed(self.records.iter().map(|r| r.run_id)),
            self.uids_key(),
            join_dashed(self.records.iter().map(|r| r.time)),
        )
    }
}

fn join_dashed<T: ToString>(values: impl Iterator<Item = T>) -> String {
    values.map(|v| v.to_string()).collect::<Vec<_>>().join("-")
}

/// Result of slicing: whole-character buckets plus the trailing records that
/// did not add up to a character yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceOutcome {
    pub buckets: Vec<SlicedAnnotation>,
    pub leftover: Vec<AnnotationRecord>,
}

impl SliceOutcome {
    pub fn total_chars(&self) -> usize {
        self.buckets.iter().map(|b| b.chars).sum()
    }

    pub fn leftover_meters(&self) -> Meters {
        self.leftover.iter().map(|r| r.length).sum()
    }

    pub fn total_meters(&self) -> Meters {
        self.buckets.iter().map(SlicedAnnotation::meters).sum::<Meters>() + self.leftover_meters()
    }
}

/// Which part of a run to extract records for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSpan {
    /// The first `n` meters, walking segments from the front.
    Leading(Meters),
    /// The last `n` meters, walking segments from the back.
    Trailing(Meters),
}

#[derive(Debug, Clone, Copy)]
pub struct Accountant {
    meters_per_char: NonZeroU64,
}

impl Accountant {
    pub fn new(meters_per_char: NonZeroU64) -> Self {
        Self { meters_per_char }
    }

    pub fn meters_per_char(&self) -> NonZeroU64 {
        self.meters_per_char
    }

    /// Buckets for `run`, preceded by the unconverted tail of the last
    /// annotated run. `None` for runs that did not succeed.
    pub fn annotate_run<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        run: &Run,
    ) -> Result<Option<SliceOutcome>, StoreError> {
        if !run.status.is_success() {
            debug!("[run {}] status {:?}, nothing to annotate", run.id, run.status);
            return Ok(None);
        }

        let run_meters = store.run_length(run)?;
        let leftover_meters = math::leftover_meters(store, self.meters_per_char)?;

        let mut records = self.carried_records(store, run, leftover_meters)?;
        records.extend(self.records_for_run(store, run, RecordSpan::Leading(run_meters))?);

        let outcome = self.slice(records);
        debug!(
            "[run {}] {} m sliced into {} chars, {} m left over",
            run.id,
            run_meters,
            outcome.total_chars(),
            outcome.leftover_meters()
        );
        Ok(Some(outcome))
    }

    /// Tail records of the annotated history worth `leftover` meters. The
    /// tail usually sits in the last annotated run alone; runs shorter than
    /// the leftover pull in the runs before them.
    fn carried_records<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        run: &Run,
        leftover: Meters,
    ) -> Result<Vec<AnnotationRecord>, StoreError> {
        let mut carried = Vec::new();
        let mut need = leftover;
        for previous in store.annotated_runs().iter().rev() {
            if need == 0 {
                break;
            }
            let take = need.min(store.run_length(previous)?);
            if take == 0 {
                continue;
            }
            info!(
                "[run {}] carrying {} m over from run {}",
                run.id, take, previous.id
            );
            let mut records = self.records_for_run(store, previous, RecordSpan::Trailing(take))?;
            records.append(&mut carried);
            carried = records;
            need -= take;
        }
        Ok(carried)
    }

    pub fn records_for_run<S: LedgerStore + ?Sized>(
        &self,
        store: &S,
        run: &Run,
        span: RecordSpan,
    ) -> Result<Vec<AnnotationRecord>, StoreError> {
        let segments = store.segments_for_run(run)?;
        Ok(records_for_segments(run.id, &segments, span))
    }

    /// Greedily packs records into buckets of exactly one character's worth
    /// of meters, splitting records across bucket boundaries. A record that
    /// overflows an empty bucket closes as many whole characters as it covers.
    pub fn slice(&self, records: Vec<AnnotationRecord>) -> SliceOutcome {
        let mpc = self.meters_per_char.get();
        let mut outcome = SliceOutcome::default();
        let mut bucket: Vec<AnnotationRecord> = Vec::new();
        let mut length: Meters = 0;

        for record in records {
            let mut pending = Some(record);
            while let Some(mut record) = pending.take() {
                if length + record.length <= mpc {
                    length += record.length;
                    bucket.push(record);
                    if length == mpc {
                        outcome.buckets.push(SlicedAnnotation {
                            records: std::mem::take(&mut bucket),
                            chars: 1,
                        });
                        length = 0;
                    }
                    continue;
                }

                let remainder;
                let chars;
                if bucket.is_empty() {
                    remainder = record.length % mpc;
                    record.length -= remainder;
                    chars = (record.length / mpc) as usize;
                } else {
                    let room = mpc - length;
                    remainder = record.length - room;
                    record.length = room;
                    chars = 1;
                }
                bucket.push(record);
                outcome.buckets.push(SlicedAnnotation {
                    records: std::mem::take(&mut bucket),
                    chars,
                });
                length = 0;

                if remainder > 0 {
                    pending = Some(AnnotationRecord {
                        length: remainder,
                        ..record
                    });
                }
            }
        }

        outcome.leftover = bucket;
        outcome
    }
}

/// Splits an ordered segment list into per-owner records.
///
/// Leading spans walk from the front, flushing a record whenever a takeover
/// marker hands the run to a different owner. Trailing spans walk from the
/// back and return their records in chronological order; each segment is
/// credited to the owner it belongs to in the forward walk, so the tail of a
/// run always matches the end of its leading extraction.
pub fn records_for_segments(
    run_id: RunId,
    segments: &[ReadSegment],
    span: RecordSpan,
) -> Vec<AnnotationRecord> {
    match span {
        RecordSpan::Leading(limit) => leading_records(run_id, segments, limit),
        RecordSpan::Trailing(limit) => trailing_records(run_id, segments, limit),
    }
}

fn leading_records(run_id: RunId, segments: &[ReadSegment], limit: Meters) -> Vec<AnnotationRecord> {
    let mut records = Vec::new();
    let mut current = AnnotationRecord::unowned(run_id);
    let mut owned = false;
    let mut counter: Meters = 0;

    for segment in segments {
        if counter >= limit {
            break;
        }
        match segment.kind {
            SegmentKind::Takeover => {
                if owned && current.uid == segment.owner {
                    continue;
                }
                if current.length > 0 {
                    records.push(current);
                }
                current = AnnotationRecord {
                    uid: segment.owner,
                    run_id,
                    time: segment.created,
                    length: 0,
                };
                owned = true;
            }
            SegmentKind::Measured { length } => {
                if !owned {
                    current.uid = segment.owner;
                    current.time = segment.created;
                    owned = true;
                }
                let take = length.min(limit - counter);
                counter += take;
                current.length += take;
            }
        }
    }

    if current.length > 0 || records.is_empty() {
        records.push(current);
    }
    records
}

fn trailing_records(run_id: RunId, segments: &[ReadSegment], limit: Meters) -> Vec<AnnotationRecord> {
    let owners = ownership(segments);
    let mut records: Vec<AnnotationRecord> = Vec::new();
    let mut counter: Meters = 0;

    for (segment, owner) in segments.iter().zip(owners).rev() {
        if counter >= limit {
            break;
        }
        let SegmentKind::Measured { length } = segment.kind else {
            continue;
        };
        let take = length.min(limit - counter);
        if take == 0 {
            continue;
        }
        counter += take;
        let (uid, time) = owner;
        match records.last_mut() {
            Some(last) if last.uid == uid && last.time == time => last.length += take,
            _ => records.push(AnnotationRecord {
                uid,
                run_id,
                time,
                length: take,
            }),
        }
    }

    if records.is_empty() {
        records.push(AnnotationRecord::unowned(run_id));
    }
    records.reverse();
    records
}

/// Owner and ownership start time of every segment, as the forward walk sees it.
fn ownership(segments: &[ReadSegment]) -> Vec<(Uid, Timestamp)> {
    let mut current: Option<(Uid, Timestamp)> = None;
    segments
        .iter()
        .map(|segment| {
            match segment.kind {
                SegmentKind::Takeover => {
                    if current.map(|(uid, _)| uid) != Some(segment.owner) {
                        current = Some((segment.owner, segment.created));
                    }
                }
                SegmentKind::Measured { .. } => {
                    if current.is_none() {
                        current = Some((segment.owner, segment.created));
                    }
                }
            }
            current.unwrap_or((segment.owner, segment.created))
        })
        .collect()
}
