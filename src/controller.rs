//! Adaptation controller
//!
//! The decision core. For each attention signal it picks at most one action:
//!
//! 1. `suggestBreak` starts a break (content left untouched)
//! 2. `generatedContent` replaces the artifact wholesale
//! 3. `suggestedContentType` switches the representation, keeping the payload
//! 4. the threshold policy switches the representation, keeping the payload
//!
//! A signal with `shouldSwitchContent == false` only updates telemetry. While
//! a break runs no content changes are made. The decision is computed first
//! and the cooldown gate is taken only when that decision would change state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::breaks::{BreakScheduler, BreakSession};
use crate::config::ControllerConfig;
use crate::cooldown::CooldownGate;
use crate::error::AdaptError;
use crate::policy::ContentTypePolicy;
use crate::signal::AttentionSignal;
use crate::store::{AttentionReading, ContentStore, ViewerSnapshot};
use crate::types::{ContentArtifact, ContentPayload, ContentType, Provenance};

/// Outcome of processing one signal
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "camelCase")]
pub enum ControllerEffect {
    NoOp,
    BreakActivated { session: BreakSession },
    ContentReplaced { artifact: Arc<ContentArtifact> },
}

impl ControllerEffect {
    pub fn is_noop(&self) -> bool {
        matches!(self, ControllerEffect::NoOp)
    }
}

/// Request to fetch a payload matching the displayed representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// Store revision the payload is for
    pub revision: u64,
    pub content_type: ContentType,
    /// Summary text of the loaded material, used as generation input
    pub source_text: Option<String>,
}

enum Plan {
    Break,
    Replace(ContentArtifact, Provenance),
}

pub struct AdaptationController {
    store: ContentStore,
    cooldown: CooldownGate,
    breaks: BreakScheduler,
    source_text: Option<String>,
}

impl Default for AdaptationController {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

impl AdaptationController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            store: ContentStore::new(),
            cooldown: CooldownGate::new(config.cooldown()),
            breaks: BreakScheduler::new(config.break_duration()),
            source_text: None,
        }
    }

    /// Process one attention signal received at `now`
    pub fn on_attention_signal(
        &mut self,
        signal: &AttentionSignal,
        now: DateTime<Utc>,
    ) -> ControllerEffect {
        self.store.record_telemetry(AttentionReading {
            attention_level: signal.attention_level,
            should_switch_content: signal.should_switch_content,
            received_at: now,
        });

        if let Some(session) = self.breaks.expire_due(now) {
            info!("Break {} elapsed", session.id);
        }

        let effect = self.decide_and_apply(signal, now);
        self.publish(now);
        effect
    }

    /// Process a JSON signal. Malformed telemetry is dropped as a no-op.
    pub fn on_raw_signal(&mut self, json: &str, now: DateTime<Utc>) -> ControllerEffect {
        match AttentionSignal::parse(json) {
            Ok(signal) => self.on_attention_signal(&signal, now),
            Err(e) => {
                warn!("Dropping attention signal: {}", e);
                ControllerEffect::NoOp
            }
        }
    }

    fn decide_and_apply(&mut self, signal: &AttentionSignal, now: DateTime<Utc>) -> ControllerEffect {
        if !signal.should_switch_content {
            return ControllerEffect::NoOp;
        }

        let current = match self.store.current() {
            Some(current) if self.store.content_loaded() => current,
            _ => {
                debug!("No content loaded, ignoring signal");
                return ControllerEffect::NoOp;
            }
        };

        if let Some(session) = self.breaks.active_session(now) {
            debug!(
                "On break {} ({} ms left), not adapting",
                session.id,
                session.remaining_ms(now)
            );
            return ControllerEffect::NoOp;
        }

        let plan = match Self::plan(signal, &current, now) {
            Some(plan) => plan,
            None => return ControllerEffect::NoOp,
        };

        if !self.cooldown.try_acquire(now) {
            debug!(
                "Cooldown active for another {} ms",
                self.cooldown.remaining(now).num_milliseconds()
            );
            return ControllerEffect::NoOp;
        }

        match plan {
            Plan::Break => match self.breaks.activate(now) {
                Some(session) => {
                    info!(
                        "Break {} started at attention {}",
                        session.id, signal.attention_level
                    );
                    ControllerEffect::BreakActivated { session }
                }
                None => ControllerEffect::NoOp,
            },
            Plan::Replace(artifact, provenance) => {
                info!(
                    "Switching content from {} to {} ({:?}, attention {})",
                    current.content_type, artifact.content_type, provenance, signal.attention_level
                );
                let artifact = self.store.commit(artifact, provenance);
                ControllerEffect::ContentReplaced { artifact }
            }
        }
    }

    /// Pick the first applicable branch without touching any state
    fn plan(signal: &AttentionSignal, current: &ContentArtifact, now: DateTime<Utc>) -> Option<Plan> {
        if signal.suggest_break {
            return Some(Plan::Break);
        }

        if let Some(generated) = &signal.generated_content {
            match generated.resolve() {
                Ok(payload) => {
                    let artifact = ContentArtifact {
                        focus_score: signal.attention_level,
                        content_type: payload.kind(),
                        data: payload,
                        timestamp: Some(now),
                    };
                    return Some(Plan::Replace(artifact, Provenance::Generated));
                }
                Err(e) => warn!("Declining generated content: {}", e),
            }
        }

        if let Some(suggested) = signal.suggested_type() {
            if suggested == current.content_type {
                return None;
            }
            return Some(Plan::Replace(
                current.retyped(suggested, now),
                Provenance::Suggested,
            ));
        }

        let decided = ContentTypePolicy::decide(signal.attention_level, current.content_type);
        if decided == current.content_type {
            return None;
        }
        Some(Plan::Replace(current.retyped(decided, now), Provenance::Policy))
    }

    /// Install a new base artifact. All adaptation state from the previous
    /// material is dropped.
    pub fn load_artifact(&mut self, artifact: ContentArtifact, now: DateTime<Utc>) -> Arc<ContentArtifact> {
        self.reset_adaptation();
        self.source_text = artifact.data.source_text().map(str::to_string);
        let artifact = self.store.load(artifact.with_timestamp(now));
        info!(
            "Loaded {} content '{}'",
            artifact.content_type,
            artifact.data.title().unwrap_or("untitled")
        );
        self.publish(now);
        artifact
    }

    /// A new file was selected; content is unavailable until ingestion ends
    pub fn begin_loading(&mut self, now: DateTime<Utc>) {
        self.store.begin_loading();
        self.publish(now);
    }

    /// Ingestion failed; the session has no content
    pub fn ingestion_failed(&mut self, now: DateTime<Utc>) {
        self.reset_adaptation();
        self.source_text = None;
        self.store.unload();
        self.publish(now);
    }

    /// Manual dismissal of the running break
    pub fn dismiss_break(&mut self, now: DateTime<Utc>) -> Option<BreakSession> {
        let ended = self.breaks.dismiss();
        if let Some(session) = &ended {
            info!("Break {} dismissed", session.id);
            self.publish(now);
        }
        ended
    }

    /// Automatic end of a specific break; ignored if it already ended
    pub fn expire_break(&mut self, session_id: Uuid, now: DateTime<Utc>) -> Option<BreakSession> {
        let ended = self.breaks.expire(session_id);
        if let Some(session) = &ended {
            info!("Break {} elapsed", session.id);
            self.publish(now);
        }
        ended
    }

    /// Payload fetch needed after a type-only switch, if any
    pub fn pending_refresh(&self) -> Option<RefreshRequest> {
        let current = self.store.current()?;
        if current.payload_matches() {
            return None;
        }
        Some(RefreshRequest {
            revision: self.store.revision(),
            content_type: current.content_type,
            source_text: self.source_text.clone(),
        })
    }

    /// Complete a refresh. Accepted only for the revision it was requested
    /// for, only when the payload fits the displayed representation, and
    /// never while a break is running.
    pub fn fulfil_refresh(
        &mut self,
        revision: u64,
        payload: ContentPayload,
        now: DateTime<Utc>,
    ) -> Result<Arc<ContentArtifact>, AdaptError> {
        let current = self.store.current().ok_or(AdaptError::NoContentLoaded)?;

        if let Some(session) = self.breaks.active_session(now) {
            return Err(AdaptError::BreakActive(session.id));
        }
        if revision != self.store.revision() {
            return Err(AdaptError::StaleRefresh {
                requested: revision,
                current: self.store.revision(),
            });
        }
        if payload.kind() != current.content_type {
            return Err(AdaptError::PayloadMismatch {
                expected: current.content_type.to_string(),
                actual: payload.kind().to_string(),
            });
        }

        let refreshed = ContentArtifact {
            focus_score: current.focus_score,
            content_type: current.content_type,
            data: payload,
            timestamp: Some(now),
        };
        let artifact = self.store.commit(refreshed, Provenance::Refreshed);
        info!("Refreshed {} payload", artifact.content_type);
        self.publish(now);
        Ok(artifact)
    }

    pub fn current(&self) -> Option<Arc<ContentArtifact>> {
        self.store.current()
    }

    pub fn content_loaded(&self) -> bool {
        self.store.content_loaded()
    }

    pub fn active_break(&self, now: DateTime<Utc>) -> Option<&BreakSession> {
        self.breaks.active_session(now)
    }

    pub fn cooldown(&self) -> &CooldownGate {
        &self.cooldown
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> ViewerSnapshot {
        self.store.snapshot(self.breaks.active_session(now).cloned())
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerSnapshot> {
        self.store.subscribe()
    }

    fn reset_adaptation(&mut self) {
        self.cooldown.reset();
        if let Some(session) = self.breaks.reset() {
            info!("Break {} cancelled by reload", session.id);
        }
    }

    fn publish(&self, now: DateTime<Utc>) {
        self.store.publish(self.breaks.active_session(now).cloned());
    }
}
