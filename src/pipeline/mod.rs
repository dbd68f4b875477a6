//! Ordered streaming reply pipeline.
//!
//! Splits a live model reply into tagged sentence units, enriches them in
//! parallel and publishes them strictly in the order the model produced them:
//! ```text
//! ┌──────────┐    ┌───────────┐    ┌──────────┐    ┌──────────┐    ┌───────────┐    ┌─────────────┐
//! │ Fragment │───▶│ Segmenter │───▶│WorkQueue │───▶│ Worker×N │───▶│ SlotTable │───▶│  Publisher  │───▶ caller
//! │  stream  │    │           │    │(bounded) │    │  (async) │    │           │    │ (in order)  │
//! └──────────┘    └───────────┘    └──────────┘    └──────────┘    └───────────┘    └─────────────┘
//!                       │                                               ▲
//!                       └──────────── create slot per index ────────────┘
//! ```
//!
//! The [`coordinator`] owns all of it for the duration of one turn.

pub mod coordinator;
pub mod error;
pub mod publisher;
pub mod queue;
pub mod segmenter;
pub mod slots;
pub mod tagging;
pub mod types;
pub mod worker;

pub use coordinator::{
    Collaborators, PipelineConfig, ReplyPipeline, ReplyStream, TurnRequest, TurnState,
};
pub use error::{ErrorReporter, LogReporter, StationError};
pub use publisher::Publisher;
pub use queue::{WorkItem, WorkQueue};
pub use segmenter::Segmenter;
pub use slots::{PendingSlot, SlotTable, SlotTicket};
pub use types::{ClientNotice, Emotion, Enrichment, Publication, ReplyUnit, SentenceUnit};
pub use worker::{Enricher, EnrichmentSettings, Worker};
