//! replystream - Ordered streaming pipeline for tagged language-model replies
//!
//! Segments a live reply into `【emotion】text` units, enriches them in
//! parallel and publishes them in the order the model wrote them.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod replay;

// Collaborator traits (source → enrich → sink)
pub use collaborators::{
    ConversationMemory, EmotionClassifier, FragmentStream, Role, StatusSink, Translator,
    VoiceSynthesizer,
};

// Pipeline
pub use pipeline::{
    ClientNotice, Collaborators, PipelineConfig, ReplyPipeline, ReplyStream, ReplyUnit,
    SentenceUnit, TurnRequest,
};

// Error handling
pub use error::{ReplyError, Result};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
