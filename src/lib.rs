//! Focus Flux - attention-adaptive presentation of study material
//!
//! Flux decides how summarized study material is shown from a stream of
//! attention signals: signal → break / generated replacement / suggested
//! type / threshold policy → cooldown gate → published snapshot.
//!
//! ## Modules
//!
//! - **Decision core** (`controller`, `policy`, `cooldown`, `breaks`, `store`):
//!   synchronous, clock passed in explicitly
//! - **Runtime** (`runtime`, `backend`, `ingestion`, `generation`): tokio task
//!   wiring the core to timers and the summarize / generate backend

pub mod backend;
pub mod breaks;
pub mod config;
pub mod controller;
pub mod cooldown;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod policy;
pub mod runtime;
pub mod signal;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use backend::{ContentBackend, HttpBackend};
pub use breaks::{BreakScheduler, BreakSession};
pub use config::{ControllerConfig, ViewerConfig};
pub use controller::{AdaptationController, ControllerEffect, RefreshRequest};
pub use cooldown::CooldownGate;
pub use error::AdaptError;
pub use policy::ContentTypePolicy;
pub use runtime::{ViewerHandle, ViewerRuntime};
pub use signal::{AttentionSignal, GeneratedContent};
pub use store::{ContentStore, ViewerSnapshot};
pub use types::{ContentArtifact, ContentPayload, ContentType, Provenance};

/// Flux version reported by the CLI and FFI
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported alongside the version
pub const PRODUCER_NAME: &str = "focus-flux";
