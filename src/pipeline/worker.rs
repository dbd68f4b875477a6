//! Enrichment worker station.
//!
//! Each worker pulls one sentence unit at a time, parses it, runs the
//! translator or the synthesizer plus the emotion classifier, and fulfils the
//! unit's pending slot. Every failure is contained to the unit it happened in.

use crate::collaborators::{EmotionClassifier, Translator, VoiceSynthesizer};
use crate::config::EnrichmentSection;
use crate::defaults;
use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::queue::WorkQueue;
use crate::pipeline::tagging;
use crate::pipeline::types::{Emotion, Enrichment, ReplyUnit, SentenceUnit};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Per-unit enrichment behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentSettings {
    /// When false the tag is used as the label with confidence 1.0.
    pub classify_emotions: bool,
    /// Label used when the classifier fails.
    pub default_emotion: String,
    pub default_confidence: f32,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            classify_emotions: true,
            default_emotion: defaults::DEFAULT_EMOTION.to_string(),
            default_confidence: defaults::DEFAULT_CONFIDENCE,
        }
    }
}

impl From<&EnrichmentSection> for EnrichmentSettings {
    fn from(section: &EnrichmentSection) -> Self {
        Self {
            classify_emotions: section.classify_emotions,
            default_emotion: section.default_emotion.clone(),
            default_confidence: section.default_confidence,
        }
    }
}

/// Turns one sentence unit into a reply unit. Shared by all workers of a turn.
pub struct Enricher {
    pub(crate) classifier: Arc<dyn EmotionClassifier>,
    pub(crate) translator: Arc<dyn Translator>,
    pub(crate) synthesizer: Arc<dyn VoiceSynthesizer>,
    pub(crate) settings: EnrichmentSettings,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    /// User message echoed on every unit of the turn.
    pub(crate) echo_of_input: String,
    pub(crate) speaker: Option<String>,
}

impl Enricher {
    /// Enriches one unit. `None` means there is nothing to publish for it.
    pub async fn enrich(&self, unit: &SentenceUnit) -> Option<ReplyUnit> {
        let index = unit.sequence_index;
        let Some(parsed) = tagging::analyze(&unit.text) else {
            if !unit.text.trim().is_empty() {
                tracing::warn!(index, "no tagged content in sentence, skipping");
            }
            return None;
        };

        let enrichment = Enrichment {
            sequence_index: index,
            tag: parsed.tag,
            display_text: parsed.display_text,
            caption: parsed.caption,
            stage_direction: parsed.stage_direction,
            audio_ref: None,
            speaker: self.speaker.clone(),
        };

        let tag = enrichment.tag.clone();
        let (enrichment, emotion) = tokio::join!(self.fill(enrichment), self.resolve_emotion(&tag, index));

        Some(ReplyUnit::from_enrichment(
            enrichment,
            emotion,
            &self.echo_of_input,
            unit.is_final,
        ))
    }

    /// Runs exactly one of translator (no caption yet) or synthesizer (caption present).
    async fn fill(&self, enrichment: Enrichment) -> Enrichment {
        let index = enrichment.sequence_index;
        let fallback = enrichment.clone();
        let (stage, result) = if enrichment.caption.is_none() {
            (self.translator.name(), self.translator.translate(enrichment).await)
        } else {
            (self.synthesizer.name(), self.synthesizer.synthesize(enrichment).await)
        };

        match result {
            Ok(filled) => filled,
            Err(e) => {
                self.reporter.report(
                    "worker",
                    &StationError::Recoverable(format!("unit {}: {} failed: {}", index, stage, e)),
                );
                fallback
            }
        }
    }

    async fn resolve_emotion(&self, tag: &str, index: u64) -> Emotion {
        if !self.settings.classify_emotions {
            return Emotion::new(tag, 1.0);
        }
        match self.classifier.classify(tag).await {
            Ok(emotion) => emotion,
            Err(e) => {
                self.reporter.report(
                    "worker",
                    &StationError::Recoverable(format!(
                        "unit {}: {} failed on '{}': {}",
                        index,
                        self.classifier.name(),
                        tag,
                        e
                    )),
                );
                Emotion::new(
                    self.settings.default_emotion.clone(),
                    self.settings.default_confidence,
                )
            }
        }
    }
}

/// One member of the enrichment pool.
pub struct Worker {
    id: usize,
    enricher: Arc<Enricher>,
}

impl Worker {
    pub fn new(id: usize, enricher: Arc<Enricher>) -> Self {
        Self { id, enricher }
    }

    /// Runs until a stop sentinel arrives.
    pub async fn run(self, queue: WorkQueue) {
        let worker = self.id;
        tracing::debug!(worker, "worker started");

        while let Some(item) = queue.pop().await {
            let (unit, ticket, ack) = item.into_parts();
            let index = unit.sequence_index;

            let outcome = AssertUnwindSafe(self.enricher.enrich(&unit))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Some(reply)) => {
                    tracing::debug!(worker, index, emotion = %reply.resolved_emotion, "unit enriched");
                    ticket.fulfil(reply);
                }
                Ok(None) => {
                    tracing::debug!(worker, index, "unit produced no reply");
                    drop(ticket);
                }
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .copied()
                        .or_else(|| panic.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic");
                    self.enricher.reporter.report(
                        "worker",
                        &StationError::Recoverable(format!("unit {} panicked: {}", index, msg)),
                    );
                    drop(ticket);
                }
            }

            drop(ack);
        }

        tracing::debug!(worker, "worker stopped");
    }
}
