//! Cineflow Playback - Adaptive playback session management
//!
//! This crate turns a "watch this title" request into a running, adaptive,
//! access-controlled video session and manages its lifecycle across source
//! switches, quality changes, and network conditions:
//! - Source normalization (heterogeneous raw records -> canonical sources)
//! - Entitlement gating with protected URL resolution
//! - Engine lifecycle (attach, load, teardown, re-attach) with at most one
//!   live engine per player surface
//! - Adaptive bitrate seeding and manual quality override
//! - Audio/text track selection
//! - Watch-progress recording and resume
//! - Fullscreen / picture-in-picture transitions that never interrupt
//!   the running session
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Cineflow Playback                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Source    │  │  Entitlement │  │  Bandwidth   │           │
//! │  │  Normalizer  │  │     Gate     │  │  Estimator   │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │   Session   │                              │
//! │                    │   Manager   │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │   Quality    │  │    Track    │  │   Progress   │            │
//! │  │  Controller  │  │  Controller │  │   Recorder   │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Catalog storage, identity, subscription/rental records, and UI chrome
//! are external collaborators behind traits.

pub mod bandwidth;
pub mod engine;
pub mod entitlement;
pub mod error;
pub mod presentation;
pub mod progress;
pub mod quality;
pub mod session;
pub mod source;
pub mod tracks;
pub mod types;

pub use bandwidth::{BandwidthEstimator, ThroughputHint};
pub use engine::{EngineFactory, MediaSink, StreamingEngine};
pub use entitlement::{
    EntitlementFacts, EntitlementFactsFeed, EntitlementGate, EntitlementResolver, FactsState,
    GateState, LockReason, ResolveRequest, ResolveResponse,
};
pub use error::{Error, Result};
pub use presentation::{PresentationController, PresentationMode, PresentationSurface};
pub use progress::{ProgressRecorder, WatchHistoryStore, WatchRecord};
pub use quality::QualityController;
pub use session::SessionManager;
pub use source::{normalize_sources, RawSource};
pub use tracks::{TextSelection, TrackController};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the playback library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Cineflow Playback initialized");
}
