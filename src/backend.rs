//! Backend seam used by the runtime
//!
//! The runtime only needs two things from the outside world: turning a file
//! into a base artifact, and turning summary text into a payload of a given
//! kind. [`HttpBackend`] does both over HTTP; tests supply their own.

use std::future::Future;
use std::path::PathBuf;

use crate::config::ViewerConfig;
use crate::error::AdaptError;
use crate::generation::GenerationClient;
use crate::ingestion::IngestionClient;
use crate::types::{ContentArtifact, ContentPayload, ContentType};

pub trait ContentBackend: Send + Sync + 'static {
    /// Upload and summarize a file
    fn ingest(
        &self,
        path: PathBuf,
    ) -> impl Future<Output = Result<ContentArtifact, AdaptError>> + Send;

    /// Produce a payload of `content_type` from summary text
    fn generate(
        &self,
        content_type: ContentType,
        source_text: String,
    ) -> impl Future<Output = Result<ContentPayload, AdaptError>> + Send;
}

#[derive(Clone)]
pub struct HttpBackend {
    ingestion: IngestionClient,
    generation: GenerationClient,
}

impl HttpBackend {
    pub fn new(config: &ViewerConfig) -> Result<Self, AdaptError> {
        Ok(Self {
            ingestion: IngestionClient::new(config)?,
            generation: GenerationClient::new(config)?,
        })
    }
}

impl ContentBackend for HttpBackend {
    async fn ingest(&self, path: PathBuf) -> Result<ContentArtifact, AdaptError> {
        self.ingestion.submit_file(&path).await
    }

    async fn generate(
        &self,
        content_type: ContentType,
        source_text: String,
    ) -> Result<ContentPayload, AdaptError> {
        self.generation
            .generate_payload(content_type, &source_text)
            .await
    }
}
