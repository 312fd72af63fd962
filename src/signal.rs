//! Attention signal schema
//!
//! Signals arrive from the sensing side as camelCase JSON. Telemetry is best
//! effort, so parsing is lenient about optional directives and strict about
//! the two fields every decision needs: `attentionLevel` and
//! `shouldSwitchContent`.

use serde::{Deserialize, Serialize};

use crate::error::AdaptError;
use crate::types::{ContentPayload, ContentType};

/// Highest valid attention level
pub const MAX_ATTENTION_LEVEL: u8 = 100;

/// Content produced upstream by a generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl GeneratedContent {
    pub fn new(content_type: ContentType, data: serde_json::Value) -> Self {
        Self {
            content_type: content_type.as_str().to_string(),
            data,
        }
    }

    /// Decode into a typed payload. Fails when the tag is unknown or the data
    /// is absent or does not fit the tag.
    pub fn resolve(&self) -> Result<ContentPayload, AdaptError> {
        let kind: ContentType = self
            .content_type
            .parse()
            .map_err(|e: AdaptError| AdaptError::MissingGeneratedPayload(e.to_string()))?;

        ContentPayload::from_value(kind, self.data.clone())
            .map_err(|e| AdaptError::MissingGeneratedPayload(e.to_string()))
    }
}

/// One attention telemetry event; one decision opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionSignal {
    pub attention_level: u8,
    pub should_switch_content: bool,
    #[serde(default)]
    pub suggest_break: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_content: Option<GeneratedContent>,
}

impl AttentionSignal {
    pub fn new(attention_level: u8, should_switch_content: bool) -> Self {
        Self {
            attention_level: attention_level.min(MAX_ATTENTION_LEVEL),
            should_switch_content,
            suggest_break: false,
            suggested_content_type: None,
            generated_content: None,
        }
    }

    pub fn with_break(mut self) -> Self {
        self.suggest_break = true;
        self
    }

    pub fn with_suggested_type(mut self, content_type: impl Into<String>) -> Self {
        self.suggested_content_type = Some(content_type.into());
        self
    }

    pub fn with_generated(mut self, generated: GeneratedContent) -> Self {
        self.generated_content = Some(generated);
        self
    }

    /// Parse and validate a JSON signal
    pub fn parse(json: &str) -> Result<Self, AdaptError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| AdaptError::MalformedSignal(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already decoded JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self, AdaptError> {
        let raw: RawAttentionSignal = serde_json::from_value(value)
            .map_err(|e| AdaptError::MalformedSignal(e.to_string()))?;
        raw.validate()
    }

    /// Suggested type, if the tag is one of the known representations
    pub fn suggested_type(&self) -> Option<ContentType> {
        self.suggested_content_type
            .as_deref()
            .and_then(|t| t.parse().ok())
    }
}

/// Wire form before validation; every field optional so that missing data
/// becomes a validation error instead of a decode panic upstream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttentionSignal {
    attention_level: Option<f64>,
    should_switch_content: Option<bool>,
    #[serde(default)]
    suggest_break: Option<bool>,
    #[serde(default)]
    suggested_content_type: Option<String>,
    #[serde(default)]
    generated_content: Option<GeneratedContent>,
}

impl RawAttentionSignal {
    fn validate(self) -> Result<AttentionSignal, AdaptError> {
        let level = self
            .attention_level
            .ok_or_else(|| AdaptError::MalformedSignal("missing attentionLevel".to_string()))?;

        if !level.is_finite() || level < 0.0 || level > MAX_ATTENTION_LEVEL as f64 {
            return Err(AdaptError::MalformedSignal(format!(
                "attentionLevel {} outside 0..={}",
                level, MAX_ATTENTION_LEVEL
            )));
        }

        let should_switch_content = self.should_switch_content.ok_or_else(|| {
            AdaptError::MalformedSignal("missing shouldSwitchContent".to_string())
        })?;

        Ok(AttentionSignal {
            attention_level: level.round() as u8,
            should_switch_content,
            suggest_break: self.suggest_break.unwrap_or(false),
            suggested_content_type: self
                .suggested_content_type
                .filter(|t| !t.trim().is_empty()),
            generated_content: self.generated_content,
        })
    }
}

/// Signal decoding problem found while validating a file
#[derive(Debug)]
pub struct SignalLineError {
    /// 1-based line number
    pub line: usize,
    pub error: AdaptError,
}

/// Validate NDJSON signals, one per line. Blank lines are skipped.
pub fn validate_ndjson(ndjson: &str) -> (usize, Vec<SignalLineError>) {
    let mut total = 0;
    let mut errors = Vec::new();

    for (idx, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        total += 1;
        if let Err(error) = AttentionSignal::parse(trimmed) {
            errors.push(SignalLineError {
                line: idx + 1,
                error,
            });
        }
    }

    (total, errors)
}
