//! External collaborators of the reply pipeline.
//!
//! The pipeline only talks to the language model, classifier, translator,
//! voice synthesizer, conversation store and client status channel through
//! these traits. Passthrough implementations let a turn run with no external
//! services at all.

use crate::error::Result;
use crate::pipeline::types::{ClientNotice, Emotion, Enrichment};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Live stream of reply fragments from the language model.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Maps an emotion tag to a label and confidence.
#[async_trait::async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, tag: &str) -> Result<Emotion>;

    /// Name for logging.
    fn name(&self) -> &'static str {
        "classifier"
    }
}

/// Fills `caption` for units the model did not caption itself.
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, unit: Enrichment) -> Result<Enrichment>;

    fn name(&self) -> &'static str {
        "translator"
    }
}

/// Fills `audio_ref` for units that already carry a caption.
#[async_trait::async_trait]
pub trait VoiceSynthesizer: Send + Sync {
    async fn synthesize(&self, unit: Enrichment) -> Result<Enrichment>;

    fn name(&self) -> &'static str {
        "synthesizer"
    }
}

/// Speaker of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Conversation history store. Receives one entry per completed turn.
#[async_trait::async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn append(&self, role: Role, text: &str) -> Result<()>;
}

/// Client-facing notice channel.
#[async_trait::async_trait]
pub trait StatusSink: Send + Sync {
    async fn notify(&self, notice: ClientNotice);
}

/// Uses the tag itself as the label.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughClassifier;

#[async_trait::async_trait]
impl EmotionClassifier for PassthroughClassifier {
    async fn classify(&self, tag: &str) -> Result<Emotion> {
        Ok(Emotion::new(tag, 1.0))
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Returns units unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTranslator;

#[async_trait::async_trait]
impl Translator for PassthroughTranslator {
    async fn translate(&self, unit: Enrichment) -> Result<Enrichment> {
        Ok(unit)
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Returns units unchanged, no audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughSynthesizer;

#[async_trait::async_trait]
impl VoiceSynthesizer for PassthroughSynthesizer {
    async fn synthesize(&self, unit: Enrichment) -> Result<Enrichment> {
        Ok(unit)
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Keeps conversation entries in memory.
#[derive(Debug, Default)]
pub struct InMemoryConversation {
    entries: Mutex<Vec<(Role, String)>>,
}

impl InMemoryConversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<(Role, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl ConversationMemory for InMemoryConversation {
    async fn append(&self, role: Role, text: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((role, text.to_string()));
        Ok(())
    }
}

/// Discards notices.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStatusSink;

#[async_trait::async_trait]
impl StatusSink for NullStatusSink {
    async fn notify(&self, _notice: ClientNotice) {}
}

/// Collects notices for later inspection.
#[derive(Debug, Default)]
pub struct CollectorStatusSink {
    notices: Mutex<Vec<ClientNotice>>,
}

impl CollectorStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<ClientNotice> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl StatusSink for CollectorStatusSink {
    async fn notify(&self, notice: ClientNotice) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice);
    }
}
