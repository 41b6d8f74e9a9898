//! Blob payloads and their prompt-ready renderings.
//!
//! Payload shapes vary by blob type, so they are modeled as a closed tagged
//! enum validated at the deserialization boundary; nothing deeper in the
//! pipeline branches on raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::tokens;

/// Supported blob types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlobType {
    Chat,
    Doc,
}

/// One message of a chat transcript (OpenAI-compatible shape).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Optional per-message timestamp (free-form, client-supplied).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            alias: None,
            created_at: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Display name: `alias(role)` when an alias exists, bare role otherwise.
    fn display_name(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{alias}({})", self.role),
            None => self.role.clone(),
        }
    }
}

/// Raw input unit, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlobPayload {
    Chat { messages: Vec<ChatMessage> },
    Doc { content: String },
}

impl BlobPayload {
    #[must_use]
    pub fn blob_type(&self) -> BlobType {
        match self {
            Self::Chat { .. } => BlobType::Chat,
            Self::Doc { .. } => BlobType::Doc,
        }
    }

    /// Render the payload to prompt-ready text.
    ///
    /// Chat transcripts become `[timestamp] name(role): content` lines;
    /// messages without their own timestamp fall back to the blob's
    /// creation date.
    #[must_use]
    pub fn render(&self, created_at: DateTime<Utc>) -> String {
        match self {
            Self::Chat { messages } => {
                let fallback = created_at.format("%Y/%m/%d").to_string();
                messages
                    .iter()
                    .map(|message| {
                        let stamp = message.created_at.as_deref().unwrap_or(&fallback);
                        format!("[{stamp}] {}: {}", message.display_name(), message.content)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Self::Doc { content } => content.clone(),
        }
    }

    /// Token size of the rendering; precomputed at admission and stored on
    /// the buffer entry.
    #[must_use]
    pub fn token_size(&self, created_at: DateTime<Utc>) -> usize {
        tokens::count_tokens(&self.render(created_at))
    }
}

/// A blob as loaded for flush processing: payload plus creation time.
#[derive(Debug, Clone)]
pub struct Blob {
    pub id: String,
    pub payload: BlobPayload,
    pub created_at: DateTime<Utc>,
}

impl Blob {
    #[must_use]
    pub fn blob_type(&self) -> BlobType {
        self.payload.blob_type()
    }

    #[must_use]
    pub fn render(&self) -> String {
        self.payload.render(self.created_at)
    }
}

/// Render an ordered batch as a time-sequential, XML-tagged transcript.
///
/// Blob order is semantically load-bearing: extraction prompts assume the
/// batch reads oldest-first.
#[must_use]
pub fn render_batch_xml(blobs: &[Blob]) -> String {
    blobs
        .iter()
        .enumerate()
        .map(|(i, blob)| format!("<chat index={i}>\n{}\n</chat>", blob.render()))
        .collect::<Vec<_>>()
        .join("\n")
}
