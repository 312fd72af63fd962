//! Ingestion client
//!
//! Uploads a source file to the summarize endpoint and turns the response
//! into the first artifact of a viewing session.

use std::path::Path;

use log::{debug, error};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use crate::config::ViewerConfig;
use crate::error::AdaptError;
use crate::types::{clamp_focus_score, ContentArtifact, ContentPayload, ContentType, TextContent};

/// Body returned by the upload endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub focus_score: Option<f64>,
    #[serde(rename = "type")]
    pub content_type: String,
    pub data: IngestedText,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestedText {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl IngestionResponse {
    /// Build the base artifact. A response without summarized text is a
    /// failed ingestion.
    pub fn into_artifact(self) -> Result<ContentArtifact, AdaptError> {
        let content_type: ContentType = self
            .content_type
            .parse()
            .map_err(|e: AdaptError| AdaptError::IngestionFailure(e.to_string()))?;

        let content = self
            .data
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AdaptError::IngestionFailure("summarized text is missing".to_string()))?;

        let focus_score = self.focus_score.map(clamp_focus_score).unwrap_or(0);

        let mut artifact = ContentArtifact::new(
            focus_score,
            ContentPayload::Text(TextContent {
                title: self.data.title,
                content,
            }),
        );
        artifact.content_type = content_type;
        Ok(artifact)
    }
}

#[derive(Clone)]
pub struct IngestionClient {
    client: Client,
    upload_url: String,
}

impl IngestionClient {
    pub fn new(config: &ViewerConfig) -> Result<Self, AdaptError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self::with_client(client, config.upload_url()))
    }

    pub fn with_client(client: Client, upload_url: impl Into<String>) -> Self {
        Self {
            client,
            upload_url: upload_url.into(),
        }
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    /// Read a file from disk and submit it
    pub async fn submit_file(&self, path: &Path) -> Result<ContentArtifact, AdaptError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AdaptError::IngestionFailure(format!("{}: {}", path.display(), e)))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        self.submit_bytes(file_name, bytes).await
    }

    /// Upload file contents as the multipart field `file`
    pub async fn submit_bytes(
        &self,
        file_name: String,
        bytes: Vec<u8>,
    ) -> Result<ContentArtifact, AdaptError> {
        debug!("Uploading {} ({} bytes) to {}", file_name, bytes.len(), self.upload_url);

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime_for(&file_name))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!("Upload of {} failed: {}", file_name, e);
                AdaptError::IngestionFailure(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Upload of {} rejected with {}: {}", file_name, status, body);
            return Err(AdaptError::IngestionFailure(format!("{}: {}", status, body)));
        }

        let body: IngestionResponse = response
            .json()
            .await
            .map_err(|e| AdaptError::IngestionFailure(format!("unreadable response: {}", e)))?;
        body.into_artifact()
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        _ => "application/octet-stream",
    }
}
