//! Default configuration constants for replystream.
//!
//! Shared by the config file types, the pipeline config and the tag parser so
//! the same values are used everywhere.

/// Default number of enrichment workers per turn.
///
/// Enrichment is dominated by remote calls (translation, TTS), so a handful of
/// workers is enough to hide most of the latency without flooding the services.
pub const WORKERS: usize = 3;

/// Work queue capacity per worker.
///
/// The default queue capacity is `WORKERS * QUEUE_CAPACITY_PER_WORKER`.
pub const QUEUE_CAPACITY_PER_WORKER: usize = 2;

/// Emotion label used when the classifier fails.
pub const DEFAULT_EMOTION: &str = "normal";

/// Confidence reported alongside [`DEFAULT_EMOTION`].
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Opening marker of an emotion tag.
pub const TAG_OPEN: char = '【';

/// Closing marker of an emotion tag.
pub const TAG_CLOSE: char = '】';

/// Origin tag carried by the synthetic error unit.
pub const ERROR_TAG: &str = "error";

/// Emotion shown with the synthetic error unit.
pub const ERROR_EMOTION: &str = "伤心";

/// Client status the UI returns to after a failed turn.
pub const INPUT_STATUS: &str = "input";

/// Default queue capacity for a given worker count.
pub fn queue_capacity(workers: usize) -> usize {
    workers.max(1) * QUEUE_CAPACITY_PER_WORKER
}
