//! Data types flowing through the reply pipeline.

use crate::defaults;
use serde::{Deserialize, Serialize};

/// A segmented, not yet enriched span of the model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceUnit {
    /// Raw text of the unit, including its `【tag】` prefix when present.
    pub text: String,
    /// Dense per-turn index starting at 0.
    pub sequence_index: u64,
    /// True only for the unit carrying the residual text at stream end.
    pub is_final: bool,
}

impl SentenceUnit {
    pub fn new(text: impl Into<String>, sequence_index: u64, is_final: bool) -> Self {
        Self {
            text: text.into(),
            sequence_index,
            is_final,
        }
    }
}

/// Resolved emotion for a unit's tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Emotion {
    pub label: String,
    pub confidence: f32,
}

impl Emotion {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Working copy of a unit while enrichment collaborators fill it in.
///
/// The translator fills `caption`, the synthesizer fills `audio_ref`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Enrichment {
    pub sequence_index: u64,
    /// Tag text between `【` and `】`.
    pub tag: String,
    pub display_text: String,
    pub caption: Option<String>,
    pub stage_direction: Option<String>,
    pub audio_ref: Option<String>,
    pub speaker: Option<String>,
}

/// Enriched, publish-ready sentence.
///
/// Serializes to the JSON shape the transport layer forwards to clients:
///
/// ```json
/// {"type":"reply","sequenceIndex":0,"originalTag":"高兴","emotion":"happy",
///  "message":"你好","ttsText":"Hello","isFinal":true,"confidence":0.9,...}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "reply", rename_all = "camelCase")]
pub struct ReplyUnit {
    pub sequence_index: u64,
    #[serde(rename = "originalTag")]
    pub origin_tag: String,
    #[serde(rename = "emotion")]
    pub resolved_emotion: String,
    #[serde(rename = "message")]
    pub display_text: String,
    #[serde(rename = "ttsText", default, skip_serializing_if = "Option::is_none")]
    pub secondary_caption: Option<String>,
    #[serde(rename = "motionText", default, skip_serializing_if = "Option::is_none")]
    pub stage_direction: Option<String>,
    #[serde(rename = "audioFile", default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
    #[serde(rename = "originalMessage")]
    pub echo_of_input: String,
    pub is_final: bool,
    #[serde(rename = "character", default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    pub confidence: f32,
}

impl ReplyUnit {
    /// Builds the publishable unit from a finished enrichment.
    pub fn from_enrichment(
        enrichment: Enrichment,
        emotion: Emotion,
        echo_of_input: &str,
        is_final: bool,
    ) -> Self {
        Self {
            sequence_index: enrichment.sequence_index,
            origin_tag: enrichment.tag,
            resolved_emotion: emotion.label,
            display_text: enrichment.display_text,
            secondary_caption: enrichment.caption,
            stage_direction: enrichment.stage_direction,
            audio_ref: enrichment.audio_ref,
            echo_of_input: echo_of_input.to_string(),
            is_final,
            speaker: enrichment.speaker,
            confidence: emotion.confidence,
        }
    }

    /// Synthetic terminal unit reporting a failed turn.
    pub fn error(
        sequence_index: u64,
        message: impl Into<String>,
        echo_of_input: &str,
        speaker: Option<String>,
    ) -> Self {
        Self {
            sequence_index,
            origin_tag: defaults::ERROR_TAG.to_string(),
            resolved_emotion: defaults::ERROR_EMOTION.to_string(),
            display_text: message.into(),
            secondary_caption: None,
            stage_direction: None,
            audio_ref: None,
            echo_of_input: echo_of_input.to_string(),
            is_final: true,
            speaker,
            confidence: 1.0,
        }
    }

    /// Empty terminal unit, used when the final index produced nothing to publish.
    pub fn closing(sequence_index: u64, echo_of_input: &str, speaker: Option<String>) -> Self {
        Self {
            sequence_index,
            origin_tag: String::new(),
            resolved_emotion: defaults::DEFAULT_EMOTION.to_string(),
            display_text: String::new(),
            secondary_caption: None,
            stage_direction: None,
            audio_ref: None,
            echo_of_input: echo_of_input.to_string(),
            is_final: true,
            speaker,
            confidence: 1.0,
        }
    }

    pub fn is_error(&self) -> bool {
        self.origin_tag == defaults::ERROR_TAG
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Out-of-band notices sent to the client alongside the reply stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientNotice {
    /// A turn failed. `code` is one of `401`, `404`, `network_error`, `default_error`.
    Error {
        #[serde(rename = "error_code")]
        code: String,
        detail: String,
    },
    /// The client should return to the given status.
    StatusReset { status: String },
}

impl ClientNotice {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// What the publisher forwards to the coordinator for each index.
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    /// A fulfilled slot.
    Unit(ReplyUnit),
    /// The index produced nothing to publish.
    Gap { sequence_index: u64, is_final: bool },
}

impl Publication {
    pub fn sequence_index(&self) -> u64 {
        match self {
            Publication::Unit(unit) => unit.sequence_index,
            Publication::Gap { sequence_index, .. } => *sequence_index,
        }
    }

    pub fn is_final(&self) -> bool {
        match self {
            Publication::Unit(unit) => unit.is_final,
            Publication::Gap { is_final, .. } => *is_final,
        }
    }
}
