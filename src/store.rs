//! Content state store
//!
//! Owns the single artifact that is currently displayed, where it came from,
//! and the last telemetry reading. Every change swaps the whole artifact and
//! publishes a fresh [`ViewerSnapshot`] on a watch channel, so readers only
//! ever see complete states.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::breaks::BreakSession;
use crate::types::{ContentArtifact, Provenance};

/// Last attention reading received from the sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionReading {
    pub attention_level: u8,
    pub should_switch_content: bool,
    pub received_at: DateTime<Utc>,
}

/// Read-only view handed to presentation components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerSnapshot {
    /// Incremented on every artifact change
    pub revision: u64,
    pub content_loaded: bool,
    /// An ingestion request is in flight
    pub loading: bool,
    pub artifact: Option<Arc<ContentArtifact>>,
    pub provenance: Option<Provenance>,
    pub break_session: Option<BreakSession>,
    pub telemetry: Option<AttentionReading>,
    /// The displayed type has no matching payload yet
    pub pending_refresh: bool,
}

impl Default for ViewerSnapshot {
    fn default() -> Self {
        Self {
            revision: 0,
            content_loaded: false,
            loading: false,
            artifact: None,
            provenance: None,
            break_session: None,
            telemetry: None,
            pending_refresh: false,
        }
    }
}

pub struct ContentStore {
    artifact: Option<Arc<ContentArtifact>>,
    provenance: Option<Provenance>,
    content_loaded: bool,
    loading: bool,
    revision: u64,
    telemetry: Option<AttentionReading>,
    publisher: watch::Sender<ViewerSnapshot>,
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(ViewerSnapshot::default());
        Self {
            artifact: None,
            provenance: None,
            content_loaded: false,
            loading: false,
            revision: 0,
            telemetry: None,
            publisher,
        }
    }

    /// Receive a snapshot after every published change
    pub fn subscribe(&self) -> watch::Receiver<ViewerSnapshot> {
        self.publisher.subscribe()
    }

    pub fn current(&self) -> Option<Arc<ContentArtifact>> {
        self.artifact.clone()
    }

    pub fn provenance(&self) -> Option<Provenance> {
        self.provenance
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn content_loaded(&self) -> bool {
        self.content_loaded
    }

    pub fn telemetry(&self) -> Option<&AttentionReading> {
        self.telemetry.as_ref()
    }

    /// Install a new base artifact from ingestion. Telemetry about the
    /// previous material is discarded.
    pub fn load(&mut self, artifact: ContentArtifact) -> Arc<ContentArtifact> {
        self.telemetry = None;
        self.content_loaded = true;
        self.loading = false;
        self.replace(artifact, Provenance::Initial)
    }

    /// Replace the current artifact after an adaptation decision
    pub fn commit(&mut self, artifact: ContentArtifact, provenance: Provenance) -> Arc<ContentArtifact> {
        self.replace(artifact, provenance)
    }

    /// A new file was selected and is being ingested
    pub fn begin_loading(&mut self) {
        self.loading = true;
        self.content_loaded = false;
    }

    /// Ingestion failed: nothing is loaded and nothing partial stays visible
    pub fn unload(&mut self) {
        self.artifact = None;
        self.provenance = None;
        self.content_loaded = false;
        self.loading = false;
        self.telemetry = None;
        self.revision += 1;
    }

    pub fn record_telemetry(&mut self, reading: AttentionReading) {
        self.telemetry = Some(reading);
    }

    /// Build the snapshot for the current state
    pub fn snapshot(&self, break_session: Option<BreakSession>) -> ViewerSnapshot {
        ViewerSnapshot {
            revision: self.revision,
            content_loaded: self.content_loaded,
            loading: self.loading,
            artifact: self.artifact.clone(),
            provenance: self.provenance,
            break_session,
            telemetry: self.telemetry.clone(),
            pending_refresh: self
                .artifact
                .as_ref()
                .map(|a| !a.payload_matches())
                .unwrap_or(false),
        }
    }

    /// Publish the current state to subscribers
    pub fn publish(&self, break_session: Option<BreakSession>) {
        self.publisher.send_replace(self.snapshot(break_session));
    }

    fn replace(&mut self, artifact: ContentArtifact, provenance: Provenance) -> Arc<ContentArtifact> {
        let artifact = Arc::new(artifact);
        self.artifact = Some(artifact.clone());
        self.provenance = Some(provenance);
        self.revision += 1;
        artifact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentPayload, ContentType, TextContent};

    fn text_artifact() -> ContentArtifact {
        ContentArtifact::new(
            0,
            ContentPayload::Text(TextContent {
                title: Some("OS".to_string()),
                content: "## Operating Systems".to_string(),
            }),
        )
    }

    #[test]
    fn test_commit_swaps_whole_artifact() {
        let mut store = ContentStore::new();
        let first = store.load(text_artifact());
        let retyped = first.retyped(ContentType::Quiz, Utc::now());
        let second = store.commit(retyped, Provenance::Policy);

        // The first handle still sees its own complete state
        assert_eq!(first.content_type, ContentType::Text);
        assert_eq!(second.content_type, ContentType::Quiz);
        assert_eq!(store.revision(), 2);
        assert_eq!(store.provenance(), Some(Provenance::Policy));
    }

    #[test]
    fn test_load_discards_telemetry() {
        let mut store = ContentStore::new();
        store.record_telemetry(AttentionReading {
            attention_level: 40,
            should_switch_content: true,
            received_at: Utc::now(),
        });
        store.load(text_artifact());

        assert!(store.telemetry().is_none());
        assert!(store.content_loaded());
    }

    #[test]
    fn test_unload_clears_everything() {
        let mut store = ContentStore::new();
        store.load(text_artifact());
        store.begin_loading();
        assert!(!store.content_loaded());

        store.unload();
        assert!(store.current().is_none());
        assert!(!store.snapshot(None).loading);
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let mut store = ContentStore::new();
        let rx = store.subscribe();
        store.load(text_artifact());
        store.publish(None);

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.revision, 1);
        assert!(snapshot.content_loaded);
        assert!(!snapshot.pending_refresh);
        assert_eq!(snapshot.provenance, Some(Provenance::Initial));
    }

    #[test]
    fn test_pending_refresh_after_type_only_switch() {
        let mut store = ContentStore::new();
        let loaded = store.load(text_artifact());
        store.commit(loaded.retyped(ContentType::Mindmap, Utc::now()), Provenance::Suggested);

        assert!(store.snapshot(None).pending_refresh);
    }
}
