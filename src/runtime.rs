//! Viewer runtime
//!
//! Runs an [`AdaptationController`] on its own task. Callers talk to it
//! through a cloneable [`ViewerHandle`]; every state change goes through one
//! command queue, so signals, file selections, timer expiry and backend
//! results are applied one at a time in arrival order.
//!
//! Long operations (ingestion, payload generation, the break timer) run on
//! separate tasks and report back as events:
//!
//! - each file selection gets a sequence number and only the result for the
//!   latest selection is applied
//! - each break gets a cancellable timer addressed to its session id
//! - a type-only switch triggers one payload fetch per store revision

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::ContentBackend;
use crate::breaks::BreakSession;
use crate::config::ControllerConfig;
use crate::controller::{AdaptationController, ControllerEffect};
use crate::error::AdaptError;
use crate::signal::AttentionSignal;
use crate::store::ViewerSnapshot;
use crate::types::{ContentArtifact, ContentPayload, ContentType, TextContent};

const COMMAND_BUFFER: usize = 64;

enum Command {
    Signal {
        signal: AttentionSignal,
        reply: oneshot::Sender<ControllerEffect>,
    },
    RawSignal {
        json: String,
        reply: oneshot::Sender<ControllerEffect>,
    },
    SelectFile(PathBuf),
    LoadArtifact(ContentArtifact),
    DismissBreak(oneshot::Sender<Option<BreakSession>>),
    Snapshot(oneshot::Sender<ViewerSnapshot>),
    Shutdown,
}

enum Event {
    IngestionFinished {
        selection: u64,
        result: Result<ContentArtifact, AdaptError>,
    },
    BreakElapsed(Uuid),
    RefreshFinished {
        revision: u64,
        result: Result<ContentPayload, AdaptError>,
    },
}

/// Timer that reports the end of one break. Dropping it cancels it.
struct BreakTimer {
    session_id: Uuid,
    token: CancellationToken,
}

impl BreakTimer {
    fn start(session: &BreakSession, after: Duration, events: mpsc::UnboundedSender<Event>) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let session_id = session.id;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!("Break timer {} cancelled", session_id);
                }
                _ = tokio::time::sleep(after) => {
                    let _ = events.send(Event::BreakElapsed(session_id));
                }
            }
        });

        Self { session_id, token }
    }
}

impl Drop for BreakTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Actor<B: ContentBackend> {
    controller: AdaptationController,
    backend: Arc<B>,
    events: mpsc::UnboundedSender<Event>,
    /// Sequence number of the latest file selection
    selection: u64,
    break_timer: Option<BreakTimer>,
    /// Revision a payload fetch was last started for
    refresh_requested: Option<u64>,
}

impl<B: ContentBackend> Actor<B> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
            self.request_refresh();
        }

        self.break_timer = None;
        info!("Viewer runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let now = Utc::now();
        match command {
            Command::Signal { signal, reply } => {
                let effect = self.controller.on_attention_signal(&signal, now);
                self.after_effect(&effect);
                let _ = reply.send(effect);
            }
            Command::RawSignal { json, reply } => {
                let effect = self.controller.on_raw_signal(&json, now);
                self.after_effect(&effect);
                let _ = reply.send(effect);
            }
            Command::SelectFile(path) => {
                self.selection += 1;
                let selection = self.selection;
                info!("Ingesting {} (selection {})", path.display(), selection);
                self.controller.begin_loading(now);

                let backend = Arc::clone(&self.backend);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = backend.ingest(path).await;
                    let _ = events.send(Event::IngestionFinished { selection, result });
                });
            }
            Command::LoadArtifact(artifact) => {
                // Supersedes any ingestion still in flight
                self.selection += 1;
                self.install(artifact);
            }
            Command::DismissBreak(reply) => {
                let ended = self.controller.dismiss_break(now);
                if ended.is_some() {
                    self.break_timer = None;
                }
                let _ = reply.send(ended);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.controller.snapshot(now));
            }
            Command::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: Event) {
        let now = Utc::now();
        match event {
            Event::IngestionFinished { selection, result } => {
                if selection != self.selection {
                    debug!(
                        "Dropping ingestion result for selection {} (latest is {})",
                        selection, self.selection
                    );
                    return;
                }
                match result {
                    Ok(artifact) => self.install(artifact),
                    Err(e) => {
                        warn!("Ingestion failed: {}", e);
                        self.break_timer = None;
                        self.controller.ingestion_failed(now);
                    }
                }
            }
            Event::BreakElapsed(session_id) => {
                self.controller.expire_break(session_id, now);
                if self
                    .break_timer
                    .as_ref()
                    .map(|t| t.session_id == session_id)
                    .unwrap_or(false)
                {
                    self.break_timer = None;
                }
            }
            Event::RefreshFinished { revision, result } => match result {
                Ok(payload) => match self.controller.fulfil_refresh(revision, payload, now) {
                    Ok(_) => {}
                    Err(AdaptError::BreakActive(session_id)) => {
                        // Fetched again once the break is over
                        debug!(
                            "Holding back refresh for revision {} during break {}",
                            revision, session_id
                        );
                        if self.refresh_requested == Some(revision) {
                            self.refresh_requested = None;
                        }
                    }
                    Err(e) => debug!("Discarding refreshed payload: {}", e),
                },
                Err(e) => warn!("Payload refresh for revision {} failed: {}", revision, e),
            },
        }
    }

    fn install(&mut self, artifact: ContentArtifact) {
        self.break_timer = None;
        self.refresh_requested = None;
        self.controller.load_artifact(artifact, Utc::now());
    }

    fn after_effect(&mut self, effect: &ControllerEffect) {
        if let ControllerEffect::BreakActivated { session } = effect {
            let remaining = session.remaining_ms(Utc::now()).max(0) as u64;
            self.break_timer = Some(BreakTimer::start(
                session,
                Duration::from_millis(remaining),
                self.events.clone(),
            ));
        }
    }

    /// Start a payload fetch if the shown representation has no matching
    /// payload yet
    fn request_refresh(&mut self) {
        if !self.controller.content_loaded() {
            return;
        }
        if self.controller.active_break(Utc::now()).is_some() {
            return;
        }
        let request = match self.controller.pending_refresh() {
            Some(request) => request,
            None => return,
        };
        if self.refresh_requested == Some(request.revision) {
            return;
        }
        self.refresh_requested = Some(request.revision);

        let source_text = match request.source_text {
            Some(text) => text,
            None => {
                warn!("No source text to refresh {} payload from", request.content_type);
                return;
            }
        };

        // Text needs no backend round trip
        if request.content_type == ContentType::Text {
            let title = self
                .controller
                .current()
                .and_then(|a| a.data.title().map(str::to_string));
            let payload = ContentPayload::Text(TextContent {
                title,
                content: source_text,
            });
            if let Err(e) = self.controller.fulfil_refresh(request.revision, payload, Utc::now()) {
                debug!("Discarding text payload: {}", e);
            }
            return;
        }

        debug!(
            "Fetching {} payload for revision {}",
            request.content_type, request.revision
        );
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let revision = request.revision;
        let content_type = request.content_type;
        tokio::spawn(async move {
            let result = backend.generate(content_type, source_text).await;
            let _ = events.send(Event::RefreshFinished { revision, result });
        });
    }
}

pub struct ViewerRuntime;

impl ViewerRuntime {
    /// Start the runtime on the current tokio runtime
    pub fn spawn<B: ContentBackend>(config: ControllerConfig, backend: B) -> ViewerHandle {
        let controller = AdaptationController::new(config);
        let snapshots = controller.subscribe();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            controller,
            backend: Arc::new(backend),
            events: event_tx,
            selection: 0,
            break_timer: None,
            refresh_requested: None,
        };
        let task = tokio::spawn(actor.run(command_rx, event_rx));

        ViewerHandle {
            commands: command_tx,
            snapshots,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

#[derive(Clone)]
pub struct ViewerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ViewerSnapshot>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ViewerHandle {
    pub async fn send_signal(&self, signal: AttentionSignal) -> Result<ControllerEffect, AdaptError> {
        self.request(|reply| Command::Signal { signal, reply }).await
    }

    /// Send a JSON signal; malformed input yields a no-op
    pub async fn send_raw_signal(&self, json: impl Into<String>) -> Result<ControllerEffect, AdaptError> {
        let json = json.into();
        self.request(|reply| Command::RawSignal { json, reply }).await
    }

    /// Start ingesting a file. Returns once the selection is queued.
    pub async fn select_file(&self, path: impl Into<PathBuf>) -> Result<(), AdaptError> {
        self.send(Command::SelectFile(path.into())).await
    }

    /// Install an artifact directly, bypassing ingestion
    pub async fn load_artifact(&self, artifact: ContentArtifact) -> Result<(), AdaptError> {
        self.send(Command::LoadArtifact(artifact)).await
    }

    pub async fn dismiss_break(&self) -> Result<Option<BreakSession>, AdaptError> {
        self.request(Command::DismissBreak).await
    }

    pub async fn snapshot(&self) -> Result<ViewerSnapshot, AdaptError> {
        self.request(Command::Snapshot).await
    }

    /// Wait until no ingestion is in flight and return that snapshot
    pub async fn wait_loaded(&self) -> Result<ViewerSnapshot, AdaptError> {
        let mut snapshots = self.snapshots.clone();
        loop {
            let snapshot = self.snapshot().await?;
            if !snapshot.loading {
                return Ok(snapshot);
            }
            snapshots
                .changed()
                .await
                .map_err(|_| AdaptError::RuntimeClosed)?;
        }
    }

    /// Receiver that sees every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ViewerSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the runtime and wait for it to exit
    pub async fn shutdown(&self) -> Result<(), AdaptError> {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Some(task) = self.task.lock().await.take() {
            task.await.map_err(|_| AdaptError::RuntimeClosed)?;
        }
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<(), AdaptError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| AdaptError::RuntimeClosed)
    }

    async fn request<T, F>(&self, make: F) -> Result<T, AdaptError>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.send(make(reply)).await?;
        response.await.map_err(|_| AdaptError::RuntimeClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MindmapContent, MindmapNode, Provenance};
    use pretty_assertions::assert_eq;

    struct FakeBackend;

    impl ContentBackend for FakeBackend {
        async fn ingest(&self, path: PathBuf) -> Result<ContentArtifact, AdaptError> {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let delay = if name == "slow" { 5_000 } else { 1_000 };
            tokio::time::sleep(Duration::from_millis(delay)).await;

            if name == "broken" {
                return Err(AdaptError::IngestionFailure("unreadable pdf".to_string()));
            }
            Ok(ContentArtifact::new(
                0,
                ContentPayload::Text(TextContent {
                    title: Some(name.clone()),
                    content: format!("Summary of {}", name),
                }),
            ))
        }

        async fn generate(
            &self,
            content_type: ContentType,
            source_text: String,
        ) -> Result<ContentPayload, AdaptError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            match content_type {
                ContentType::Mindmap => Ok(ContentPayload::Mindmap(MindmapContent {
                    title: None,
                    root: MindmapNode {
                        title: source_text,
                        children: vec![],
                    },
                })),
                other => Err(AdaptError::GenerationFailure(format!("cannot make {}", other))),
            }
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            cooldown_ms: 0,
            ..ControllerConfig::default()
        }
    }

    fn lecture() -> ContentArtifact {
        ContentArtifact::new(
            0,
            ContentPayload::Text(TextContent {
                title: Some("OS".to_string()),
                content: "Operating systems manage hardware".to_string(),
            }),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_file_loads_content() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);

        handle.select_file("lecture.pdf").await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.loading);
        assert!(!snapshot.content_loaded);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.content_loaded);
        assert!(!snapshot.loading);
        assert_eq!(
            snapshot.artifact.unwrap().data.title(),
            Some("lecture")
        );
        assert_eq!(snapshot.provenance, Some(Provenance::Initial));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_loaded_returns_after_ingestion() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);

        handle.select_file("lecture.pdf").await.unwrap();
        let snapshot = handle.wait_loaded().await.unwrap();
        assert!(!snapshot.loading);
        assert!(snapshot.content_loaded);
        assert_eq!(snapshot.artifact.unwrap().data.title(), Some("lecture"));

        handle.select_file("broken.pdf").await.unwrap();
        let snapshot = handle.wait_loaded().await.unwrap();
        assert!(!snapshot.loading);
        assert!(!snapshot.content_loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_selection_wins() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);

        handle.select_file("slow.pdf").await.unwrap();
        handle.select_file("fast.pdf").await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.artifact.unwrap().data.title(), Some("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ingestion_clears_content() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();

        handle.select_file("broken.pdf").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.content_loaded);
        assert!(!snapshot.loading);
        assert!(snapshot.artifact.is_none());

        let effect = handle.send_signal(AttentionSignal::new(10, true)).await.unwrap();
        assert_eq!(effect, ControllerEffect::NoOp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_switch_fetches_matching_payload() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();

        let effect = handle.send_signal(AttentionSignal::new(70, true)).await.unwrap();
        match effect {
            ControllerEffect::ContentReplaced { artifact } => {
                assert_eq!(artifact.content_type, ContentType::Mindmap);
                assert!(!artifact.payload_matches());
            }
            other => panic!("expected ContentReplaced, got {:?}", other),
        }

        settle().await;
        let snapshot = handle.snapshot().await.unwrap();
        let artifact = snapshot.artifact.unwrap();
        assert_eq!(artifact.content_type, ContentType::Mindmap);
        assert!(artifact.payload_matches());
        assert!(!snapshot.pending_refresh);
        assert_eq!(snapshot.provenance, Some(Provenance::Refreshed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_back_to_text_uses_source_text() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();

        handle.send_signal(AttentionSignal::new(70, true)).await.unwrap();
        settle().await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.artifact.unwrap().data.kind(), ContentType::Mindmap);

        // The high-attention guard keeps the mind map, so ask for text explicitly
        handle
            .send_signal(AttentionSignal::new(95, true).with_suggested_type("text"))
            .await
            .unwrap();
        settle().await;
        let snapshot = handle.snapshot().await.unwrap();
        let artifact = snapshot.artifact.unwrap();
        assert_eq!(artifact.content_type, ContentType::Text);
        assert!(artifact.payload_matches());
        assert_eq!(artifact.data.source_text(), Some("Operating systems manage hardware"));
        assert_eq!(snapshot.provenance, Some(Provenance::Refreshed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_leaves_switch_pending() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();

        // The fake cannot generate flashcards
        handle.send_signal(AttentionSignal::new(50, true)).await.unwrap();
        settle().await;

        let snapshot = handle.snapshot().await.unwrap();
        let artifact = snapshot.artifact.unwrap();
        assert_eq!(artifact.content_type, ContentType::Flipcard);
        assert_eq!(artifact.data.kind(), ContentType::Text);
        assert!(snapshot.pending_refresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_waits_for_break_to_end() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();

        // The mind map fetch is still in flight when the break starts
        handle.send_signal(AttentionSignal::new(70, true)).await.unwrap();
        let effect = handle
            .send_signal(AttentionSignal::new(30, true).with_break())
            .await
            .unwrap();
        assert!(matches!(effect, ControllerEffect::BreakActivated { .. }));

        settle().await;
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.break_session.is_some());
        assert!(snapshot.pending_refresh);
        let artifact = snapshot.artifact.unwrap();
        assert_eq!(artifact.content_type, ContentType::Mindmap);
        assert_eq!(artifact.data.kind(), ContentType::Text);
        assert_eq!(snapshot.provenance, Some(Provenance::Policy));

        assert!(handle.dismiss_break().await.unwrap().is_some());
        settle().await;
        let snapshot = handle.snapshot().await.unwrap();
        let artifact = snapshot.artifact.unwrap();
        assert_eq!(artifact.data.kind(), ContentType::Mindmap);
        assert!(!snapshot.pending_refresh);
        assert_eq!(snapshot.provenance, Some(Provenance::Refreshed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_break_ends_when_timer_fires() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();

        let effect = handle
            .send_signal(AttentionSignal::new(30, true).with_break())
            .await
            .unwrap();
        assert!(matches!(effect, ControllerEffect::BreakActivated { .. }));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(handle.snapshot().await.unwrap().break_session.is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.snapshot().await.unwrap().break_session.is_none());

        let effect = handle.send_signal(AttentionSignal::new(10, true)).await.unwrap();
        assert!(matches!(effect, ControllerEffect::ContentReplaced { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismissed_break_timer_cannot_end_next_break() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();

        handle
            .send_signal(AttentionSignal::new(30, true).with_break())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.dismiss_break().await.unwrap().is_some());
        assert_eq!(handle.dismiss_break().await.unwrap(), None);

        tokio::time::sleep(Duration::from_secs(100)).await;
        let second = handle
            .send_signal(AttentionSignal::new(30, true).with_break())
            .await
            .unwrap();
        let second_id = match second {
            ControllerEffect::BreakActivated { session } => session.id,
            other => panic!("expected BreakActivated, got {:?}", other),
        };

        // Past the point where the first break would have ended
        tokio::time::sleep(Duration::from_secs(250)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.break_session.map(|s| s.id), Some(second_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_cancels_break() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();
        handle
            .send_signal(AttentionSignal::new(30, true).with_break())
            .await
            .unwrap();

        handle.load_artifact(lecture()).await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.break_session.is_none());
        assert_eq!(snapshot.provenance, Some(Provenance::Initial));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_raw_signal_is_noop() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.load_artifact(lecture()).await.unwrap();

        let effect = handle
            .send_raw_signal(r#"{"attentionLevel": "high"}"#)
            .await
            .unwrap();
        assert_eq!(effect, ControllerEffect::NoOp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_published_snapshots() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        let mut snapshots = handle.subscribe();

        handle.load_artifact(lecture()).await.unwrap();
        snapshots.changed().await.unwrap();
        assert!(snapshots.borrow_and_update().content_loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_errors_after_shutdown() {
        let handle = ViewerRuntime::spawn(config(), FakeBackend);
        handle.shutdown().await.unwrap();

        assert!(matches!(
            handle.snapshot().await,
            Err(AdaptError::RuntimeClosed)
        ));
        assert!(matches!(
            handle.select_file("lecture.pdf").await,
            Err(AdaptError::RuntimeClosed)
        ));
    }
}
