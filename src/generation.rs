//! Generation client
//!
//! Asks the backend to turn summarized text into another representation.
//! The controller never calls this itself; the runtime uses it to fill in a
//! payload after a type-only switch.

use log::{debug, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ViewerConfig;
use crate::error::AdaptError;
use crate::signal::GeneratedContent;
use crate::types::{ContentPayload, ContentType};

#[derive(Serialize)]
struct GenerationRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Endpoint path that generates `content_type`, if the backend can
pub fn endpoint_for(content_type: ContentType) -> Option<&'static str> {
    match content_type {
        ContentType::Flipcard => Some("/generate-flashcards"),
        ContentType::Quiz => Some("/generate-quiz"),
        ContentType::Mindmap => Some("/generate-mindmap"),
        ContentType::React => Some("/generate-mini-game"),
        ContentType::Text => None,
    }
}

#[derive(Clone)]
pub struct GenerationClient {
    client: Client,
    base_url: String,
}

impl GenerationClient {
    pub fn new(config: &ViewerConfig) -> Result<Self, AdaptError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self::with_client(client, config.backend_url.clone()))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Request content of `content_type` generated from `text`
    pub async fn generate(
        &self,
        content_type: ContentType,
        text: &str,
    ) -> Result<GeneratedContent, AdaptError> {
        let path = endpoint_for(content_type).ok_or_else(|| {
            AdaptError::GenerationFailure(format!("no generation endpoint for {}", content_type))
        })?;
        if text.trim().is_empty() {
            return Err(AdaptError::GenerationFailure("no source text".to_string()));
        }

        let url = format!("{}{}", self.base_url, path);
        debug!("Requesting {} from {}", content_type, url);

        let response = self
            .client
            .post(&url)
            .json(&GenerationRequest { text })
            .send()
            .await
            .map_err(|e| AdaptError::GenerationFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Generation of {} failed with {}: {}", content_type, status, body);
            return Err(AdaptError::GenerationFailure(format!("{}: {}", status, body)));
        }

        let body: GenerationResponse = response
            .json()
            .await
            .map_err(|e| AdaptError::GenerationFailure(format!("unreadable response: {}", e)))?;
        if let Some(id) = &body.id {
            debug!("Generated {} as {}", body.content_type, id);
        }

        Ok(GeneratedContent {
            content_type: body.content_type,
            data: body.data,
        })
    }

    /// Generate and decode a payload, checking that it is the kind asked for
    pub async fn generate_payload(
        &self,
        content_type: ContentType,
        text: &str,
    ) -> Result<ContentPayload, AdaptError> {
        let payload = self.generate(content_type, text).await?.resolve()?;
        if payload.kind() != content_type {
            return Err(AdaptError::PayloadMismatch {
                expected: content_type.to_string(),
                actual: payload.kind().to_string(),
            });
        }
        Ok(payload)
    }
}
