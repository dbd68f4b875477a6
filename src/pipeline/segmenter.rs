//! Sentence segmenter station.
//!
//! Turns the live fragment stream into [`SentenceUnit`]s. A unit starts at `【`,
//! needs a matching `】`, and runs until the next `【`. It is only emitted once
//! that next `【` arrives, so every emitted unit has its full body. Whatever is
//! left at stream end becomes the single final unit.

use crate::defaults::{TAG_CLOSE, TAG_OPEN};
use crate::error::Result;
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::slots::SlotTable;
use crate::pipeline::types::SentenceUnit;
use futures_util::{Stream, StreamExt};
use std::sync::Arc;

/// Parser state over the append-only buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// No `【` seen yet this turn.
    AwaitingOpen,
    /// Inside `【…`, waiting for `】`. `start` is the byte offset of `【`.
    InTag { start: usize },
    /// Past `】`, collecting the body until the next `【`.
    InBody { start: usize },
}

/// Incremental sentence parser for one turn.
#[derive(Debug)]
pub struct Segmenter {
    /// Every fragment received so far, never truncated.
    buffer: String,
    /// Byte offset up to which `buffer` has been scanned.
    cursor: usize,
    state: ParseState,
    /// Offset of the first `【`. Text before it is carried into the final unit.
    first_open: Option<usize>,
    next_index: u64,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Segmenter {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            cursor: 0,
            state: ParseState::AwaitingOpen,
            first_open: None,
            next_index: 0,
        }
    }

    /// Index the next emitted unit will get.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Full text received so far.
    pub fn raw_text(&self) -> &str {
        &self.buffer
    }

    /// Appends a fragment and returns the units it completed.
    pub fn push_fragment(&mut self, fragment: &str) -> Vec<SentenceUnit> {
        self.buffer.push_str(fragment);
        let mut units = Vec::new();

        let scan_from = self.cursor;
        for (offset, c) in self.buffer[scan_from..].char_indices() {
            let pos = scan_from + offset;
            self.state = match (self.state, c) {
                (ParseState::AwaitingOpen, TAG_OPEN) => {
                    self.first_open = Some(pos);
                    ParseState::InTag { start: pos }
                }
                (ParseState::InTag { start }, TAG_CLOSE) => ParseState::InBody { start },
                (ParseState::InBody { start }, TAG_OPEN) => {
                    units.push(SentenceUnit::new(
                        &self.buffer[start..pos],
                        self.next_index,
                        false,
                    ));
                    self.next_index += 1;
                    ParseState::InTag { start: pos }
                }
                (state, _) => state,
            };
        }
        self.cursor = self.buffer.len();

        units
    }

    /// Ends the turn: returns the final unit and the full raw text.
    ///
    /// The final unit holds any text before the first `【` followed by the
    /// unfinished unit, and may be empty.
    pub fn finish(self) -> (SentenceUnit, String) {
        let prefix_end = self.first_open.unwrap_or(self.buffer.len());
        let mut residual = self.buffer[..prefix_end].to_string();
        if let ParseState::InTag { start } | ParseState::InBody { start } = self.state {
            residual.push_str(&self.buffer[start..]);
        }
        let unit = SentenceUnit::new(residual, self.next_index, true);
        (unit, self.buffer)
    }

    /// Runs the segmenter station.
    ///
    /// Pulls fragments from `source`, creates a pending slot for each completed
    /// unit and pushes it to `queue`. Pushing waits while the queue is full,
    /// which in turn stops fragment reads. Returns the raw reply text.
    pub async fn run<S>(
        mut self,
        source: S,
        queue: WorkQueue,
        slots: Arc<SlotTable>,
    ) -> Result<String>
    where
        S: Stream<Item = Result<String>> + Send,
    {
        futures_util::pin_mut!(source);

        while let Some(fragment) = source.next().await {
            let fragment = fragment?;
            for unit in self.push_fragment(&fragment) {
                dispatch(unit, &queue, &slots).await?;
            }
        }

        let (unit, raw) = self.finish();
        tracing::debug!(
            index = unit.sequence_index,
            residual_len = unit.text.len(),
            "fragment stream ended"
        );
        dispatch(unit, &queue, &slots).await?;
        Ok(raw)
    }
}

async fn dispatch(unit: SentenceUnit, queue: &WorkQueue, slots: &SlotTable) -> Result<()> {
    let ticket = slots.create(unit.sequence_index, unit.is_final);
    tracing::debug!(index = unit.sequence_index, is_final = unit.is_final, "sentence queued");
    queue.push(unit, ticket).await
}
