//! Replays a recorded model reply through the pipeline.
//!
//! Used by the `replay` command to exercise the pipeline without a live model.

use crate::collaborators::FragmentStream;
use crate::error::{ReplyError, Result};
use crate::pipeline::{ReplyPipeline, ReplyUnit, TurnRequest};
use futures_util::StreamExt;
use futures_util::stream;
use std::io::Write;

/// Splits `text` into fragments of at most `chunk_size` characters.
pub fn split_fragments(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Fragment stream over a recorded reply.
pub fn fragment_stream(text: &str, chunk_size: usize) -> FragmentStream {
    stream::iter(split_fragments(text, chunk_size).into_iter().map(Ok)).boxed()
}

/// Runs one turn over `text` and writes each reply unit as a JSON line.
///
/// Returns the units written.
pub async fn replay<W: Write>(
    pipeline: &ReplyPipeline,
    request: ReplayRequest<'_>,
    out: &mut W,
) -> Result<Vec<ReplyUnit>> {
    let mut turn = TurnRequest::new(
        request.user_message,
        fragment_stream(request.text, request.chunk_size),
    );
    if let Some(speaker) = request.speaker {
        turn = turn.with_speaker(speaker);
    }

    let mut units = Vec::new();
    let mut stream = pipeline.run_turn(turn);
    while let Some(unit) = stream.next().await {
        let line = unit.to_json().map_err(|e| ReplyError::Other(e.to_string()))?;
        writeln!(out, "{}", line)?;
        units.push(unit);
    }
    out.flush()?;
    Ok(units)
}

/// Inputs of a replayed turn.
#[derive(Debug, Clone, Copy)]
pub struct ReplayRequest<'a> {
    pub text: &'a str,
    pub chunk_size: usize,
    pub user_message: &'a str,
    pub speaker: Option<&'a str>,
}
