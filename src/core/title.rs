//! Conversation title generation
//!
//! A one-shot model call names a new conversation. Results are normalized
//! to roughly 10-15 characters; anything unusable falls back to a
//! deterministic title so callers never see a failure.

use super::llm::{ModelRequest, ModelRuntime};
use crate::storage::DEFAULT_TITLE;
use std::path::Path;
use std::sync::Arc;

const MIN_CHARS: usize = 10;
const MAX_CHARS: usize = 15;
const STEM_CHARS: usize = 12;

const TEXT_TITLE_PROMPT: &str = "Summarize the user's message as a short conversation title \
    of 10 to 15 characters. Reply with the title only, without quotes or punctuation.";

const IMAGE_TITLE_PROMPT: &str = "A conversation starts with a picture the user sent. \
    Using its filename, write a short conversation title of 10 to 15 characters describing \
    the likely subject. Do not use the words 'image' or 'uploaded'. Reply with the title only, \
    without quotes.";

pub struct TitleGenerator {
    runtime: Arc<dyn ModelRuntime>,
}

impl TitleGenerator {
    pub fn new(runtime: Arc<dyn ModelRuntime>) -> Self {
        Self { runtime }
    }

    /// Title for a conversation opened with a text message. Falls back to "Untitled".
    pub async fn text_title(&self, first_message: &str) -> String {
        let request = ModelRequest::new(first_message).with_system(TEXT_TITLE_PROMPT);
        match self.runtime.complete(request).await {
            Ok(raw) => match accept(&raw, false) {
                Some(title) => title,
                None => {
                    tracing::debug!("[TitleGenerator] Rejected text title {:?}", raw);
                    DEFAULT_TITLE.to_string()
                }
            },
            Err(e) => {
                tracing::warn!("[TitleGenerator] Text title generation failed: {}", e);
                DEFAULT_TITLE.to_string()
            }
        }
    }

    /// Title for a conversation opened with an image upload. Falls back to a
    /// name derived from the filename.
    pub async fn image_title(&self, filename: &str) -> String {
        let request = ModelRequest::new(format!("Uploaded image: {}", filename))
            .with_system(IMAGE_TITLE_PROMPT);
        match self.runtime.complete(request).await {
            Ok(raw) => match accept(&raw, true) {
                Some(title) => title,
                None => {
                    tracing::debug!("[TitleGenerator] Rejected image title {:?}", raw);
                    filename_title(filename)
                }
            },
            Err(e) => {
                tracing::warn!(
                    "[TitleGenerator] Image title generation failed for '{}': {}",
                    filename,
                    e
                );
                filename_title(filename)
            }
        }
    }
}

/// Trim, cap at 15 chars, and pad short titles with an ellipsis.
pub fn normalize_title(raw: &str) -> String {
    let mut title = raw.trim().trim_matches('"').trim().to_string();
    if title.chars().count() > MAX_CHARS {
        title = title.chars().take(MAX_CHARS).collect::<String>().trim().to_string();
    }
    if title.chars().count() < MIN_CHARS {
        title.push_str("...");
        title = title.chars().take(MAX_CHARS).collect();
    }
    title
}

/// Normalized title, or `None` when the model output is unusable.
fn accept(raw: &str, image: bool) -> Option<String> {
    let trimmed = raw.trim().trim_matches('"').trim();
    if trimmed.is_empty() || trimmed == DEFAULT_TITLE {
        return None;
    }
    let title = normalize_title(trimmed);
    if title == DEFAULT_TITLE {
        return None;
    }
    if image {
        let lower = title.to_lowercase();
        if lower.contains("image") || lower.contains("uploaded") {
            return None;
        }
    }
    Some(title)
}

/// Fallback for image conversations: first 12 chars of the file stem plus "pic".
pub fn filename_title(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let stem: String = stem.chars().take(STEM_CHARS).collect();
    format!("{}pic", stem.trim()).chars().take(MAX_CHARS).collect()
}
