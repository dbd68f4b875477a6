//! Tag analysis for a single sentence unit.
//!
//! A unit looks like `【tag】display text<caption>（stage direction）`. Only the
//! first `【tag】body` segment is used; anything before it is ignored.

use regex::Regex;
use std::sync::LazyLock;

// SAFETY: hardcoded patterns, always valid
#[allow(clippy::expect_used)]
static SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)【(.*?)】([^【】]*)").expect("valid segment pattern"));

#[allow(clippy::expect_used)]
static CAPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<(.*?)>").expect("valid caption pattern"));

#[allow(clippy::expect_used)]
static STAGE_DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)（(.*?)）").expect("valid stage direction pattern"));

#[allow(clippy::expect_used)]
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<.*?>|（.*?）").expect("valid markup pattern"));

/// Parsed parts of a tagged sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedSentence {
    pub tag: String,
    pub display_text: String,
    pub caption: Option<String>,
    pub stage_direction: Option<String>,
}

/// Rough script of a text span, enough to spot swapped caption and display text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Contains hiragana or katakana.
    Japanese,
    /// Contains CJK ideographs and no kana.
    Chinese,
    Other,
}

pub fn detect_script(text: &str) -> Script {
    let mut has_han = false;
    for c in text.chars() {
        match c {
            '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}' => {
                return Script::Japanese;
            }
            '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' => has_han = true,
            _ => {}
        }
    }
    if has_han {
        Script::Chinese
    } else {
        Script::Other
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Splits a sentence unit into tag, display text, caption and stage direction.
///
/// Returns `None` when there is no `【…】` segment, or when the segment has no
/// display text, caption or stage direction.
pub fn analyze(sentence: &str) -> Option<TaggedSentence> {
    let segment = SEGMENT.captures(sentence)?;
    let tag = segment.get(1).map_or("", |m| m.as_str()).trim().to_string();
    let body = segment
        .get(2)
        .map_or("", |m| m.as_str())
        .replace('(', "（")
        .replace(')', "）");

    let caption = CAPTION
        .captures(&body)
        .and_then(|c| c.get(1))
        .map(|m| STAGE_DIRECTION.replace_all(m.as_str(), "").into_owned())
        .and_then(|c| non_empty(&c));

    let stage_direction = STAGE_DIRECTION
        .captures(&body)
        .and_then(|c| c.get(1))
        .and_then(|m| non_empty(m.as_str()));

    let display_text = MARKUP.replace_all(&body, "").trim().to_string();

    if display_text.is_empty() && caption.is_none() && stage_direction.is_none() {
        return None;
    }

    // The model sometimes puts the Japanese line outside the brackets.
    let (display_text, caption) = match caption {
        Some(caption)
            if !display_text.is_empty()
                && detect_script(&caption) == Script::Chinese
                && detect_script(&display_text) == Script::Japanese =>
        {
            (caption, Some(display_text))
        }
        other => (display_text, other),
    };

    Some(TaggedSentence {
        tag,
        display_text,
        caption,
        stage_direction,
    })
}
