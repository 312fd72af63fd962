//! Core types for the Focus Flux controller
//!
//! This module defines the representation tags, the strongly typed payload for
//! each representation, and the content artifact that the store hands to
//! presentation components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AdaptError;

/// Representation a piece of study material can be shown in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    #[serde(alias = "mind-map")]
    Mindmap,
    #[serde(alias = "flipCard", alias = "flashcard", alias = "flashcards")]
    Flipcard,
    Quiz,
    /// Interactive mini-game / simulation
    #[serde(alias = "mini-game", alias = "miniGame", alias = "minigame")]
    React,
}

impl ContentType {
    pub const ALL: [ContentType; 5] = [
        ContentType::Text,
        ContentType::Mindmap,
        ContentType::Flipcard,
        ContentType::Quiz,
        ContentType::React,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Mindmap => "mindmap",
            ContentType::Flipcard => "flipcard",
            ContentType::Quiz => "quiz",
            ContentType::React => "react",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = AdaptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "text" => Ok(ContentType::Text),
            "mindmap" | "mind-map" => Ok(ContentType::Mindmap),
            "flipcard" | "flipCard" | "flashcard" | "flashcards" => Ok(ContentType::Flipcard),
            "quiz" => Ok(ContentType::Quiz),
            "react" | "mini-game" | "miniGame" | "minigame" => Ok(ContentType::React),
            other => Err(AdaptError::UnknownContentType(other.to_string())),
        }
    }
}

/// Summarized reading material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Markdown body
    pub content: String,
}

/// One node of a mind map tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapNode {
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MindmapNode>,
}

impl MindmapNode {
    /// Number of nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(MindmapNode::node_count).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MindmapContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub root: MindmapNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashcardDeck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub cards: Vec<Flashcard>,
}

/// Multiple choice question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub question: String,
    pub options: Vec<String>,
    pub correct_option_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub questions: Vec<QuizQuestion>,
}

/// Drag-and-drop pairing of a term with its description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniGameChallenge {
    pub task: String,
    pub solution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiniGameContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub challenges: Vec<MiniGameChallenge>,
}

/// Payload of a content artifact, one variant per representation.
///
/// On the wire the payload is untagged; the representation tag travels next
/// to it, so decoding always goes through [`ContentPayload::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContentPayload {
    Text(TextContent),
    Mindmap(MindmapContent),
    Flashcards(FlashcardDeck),
    Quiz(QuizContent),
    MiniGame(MiniGameContent),
}

impl ContentPayload {
    /// Representation this payload was built for
    pub fn kind(&self) -> ContentType {
        match self {
            ContentPayload::Text(_) => ContentType::Text,
            ContentPayload::Mindmap(_) => ContentType::Mindmap,
            ContentPayload::Flashcards(_) => ContentType::Flipcard,
            ContentPayload::Quiz(_) => ContentType::Quiz,
            ContentPayload::MiniGame(_) => ContentType::React,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            ContentPayload::Text(c) => c.title.as_deref(),
            ContentPayload::Mindmap(c) => c.title.as_deref(),
            ContentPayload::Flashcards(c) => c.title.as_deref(),
            ContentPayload::Quiz(c) => c.title.as_deref(),
            ContentPayload::MiniGame(c) => c.title.as_deref(),
        }
    }

    /// Decode and validate a JSON payload for the given representation
    pub fn from_value(kind: ContentType, value: serde_json::Value) -> Result<Self, AdaptError> {
        let invalid = |reason: String| AdaptError::InvalidPayload {
            kind: kind.to_string(),
            reason,
        };

        if value.is_null() {
            return Err(invalid("payload is null".to_string()));
        }

        let payload = match kind {
            ContentType::Text => ContentPayload::Text(
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
            ),
            ContentType::Mindmap => ContentPayload::Mindmap(
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
            ),
            ContentType::Flipcard => ContentPayload::Flashcards(
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
            ),
            ContentType::Quiz => ContentPayload::Quiz(
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
            ),
            ContentType::React => ContentPayload::MiniGame(
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
            ),
        };

        payload.validate().map_err(invalid)?;
        Ok(payload)
    }

    /// Check the structural rules the renderers rely on
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ContentPayload::Text(c) => {
                if c.content.trim().is_empty() {
                    return Err("text content is empty".to_string());
                }
            }
            ContentPayload::Mindmap(c) => {
                if c.root.title.trim().is_empty() {
                    return Err("mind map root has no title".to_string());
                }
            }
            ContentPayload::Flashcards(c) => {
                if c.cards.is_empty() {
                    return Err("deck has no cards".to_string());
                }
            }
            ContentPayload::Quiz(c) => {
                if c.questions.is_empty() {
                    return Err("quiz has no questions".to_string());
                }
                for (i, q) in c.questions.iter().enumerate() {
                    if q.correct_option_index >= q.options.len() {
                        return Err(format!(
                            "question {} has correct option {} but only {} options",
                            i,
                            q.correct_option_index,
                            q.options.len()
                        ));
                    }
                }
            }
            ContentPayload::MiniGame(c) => {
                if c.challenges.is_empty() {
                    return Err("mini-game has no challenges".to_string());
                }
            }
        }
        Ok(())
    }

    /// Summary text usable as generation input
    pub fn source_text(&self) -> Option<&str> {
        match self {
            ContentPayload::Text(c) => Some(c.content.as_str()),
            _ => None,
        }
    }
}

/// Where the current artifact came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Loaded from the ingestion pipeline
    Initial,
    /// Supplied by the generation service inside a signal
    Generated,
    /// Type switch requested explicitly by a signal
    Suggested,
    /// Type switch chosen by the threshold policy
    Policy,
    /// Payload re-fetched after a type-only switch
    Refreshed,
}

/// The displayed representation of the study material.
///
/// Artifacts are never edited in place; every change produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ArtifactWire", try_from = "ArtifactWire")]
pub struct ContentArtifact {
    /// Attention level at the time the artifact was produced (0-100)
    pub focus_score: u8,
    /// Representation presentation components should use
    pub content_type: ContentType,
    pub data: ContentPayload,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ContentArtifact {
    /// Build an artifact displayed in the representation its payload was made for
    pub fn new(focus_score: u8, data: ContentPayload) -> Self {
        Self {
            focus_score,
            content_type: data.kind(),
            data,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Copy of this artifact shown as `content_type`, keeping the payload
    pub fn retyped(&self, content_type: ContentType, now: DateTime<Utc>) -> Self {
        Self {
            focus_score: self.focus_score,
            content_type,
            data: self.data.clone(),
            timestamp: Some(now),
        }
    }

    /// Whether the payload fits the representation being shown
    pub fn payload_matches(&self) -> bool {
        self.data.kind() == self.content_type
    }
}

/// Round and clamp a backend score to 0..=100
pub(crate) fn clamp_focus_score(score: f64) -> u8 {
    if score.is_finite() {
        score.clamp(0.0, 100.0).round() as u8
    } else {
        0
    }
}

fn deserialize_focus_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let score = Option::<f64>::deserialize(deserializer)?;
    Ok(score.map(clamp_focus_score).unwrap_or(0))
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactWire {
    #[serde(default, deserialize_with = "deserialize_focus_score")]
    focus_score: u8,
    #[serde(rename = "type")]
    content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_kind: Option<ContentType>,
    data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,
}

impl From<ContentArtifact> for ArtifactWire {
    fn from(artifact: ContentArtifact) -> Self {
        let payload_kind = artifact.data.kind();
        ArtifactWire {
            focus_score: artifact.focus_score,
            content_type: artifact.content_type,
            payload_kind: (payload_kind != artifact.content_type).then_some(payload_kind),
            data: serde_json::to_value(&artifact.data).unwrap_or(serde_json::Value::Null),
            timestamp: artifact.timestamp,
        }
    }
}

impl TryFrom<ArtifactWire> for ContentArtifact {
    type Error = AdaptError;

    fn try_from(wire: ArtifactWire) -> Result<Self, Self::Error> {
        let kind = wire.payload_kind.unwrap_or(wire.content_type);
        Ok(ContentArtifact {
            focus_score: wire.focus_score,
            content_type: wire.content_type,
            data: ContentPayload::from_value(kind, wire.data)?,
            timestamp: wire.timestamp,
        })
    }
}
