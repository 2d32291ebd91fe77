//! Engine and media-sink seams
//!
//! The adaptive-streaming engine and the platform media surface are
//! collaborators behind traits; manifests and segments are opaque to this
//! crate. The session manager is the only owner of an engine handle, and
//! the only component allowed to assign a source against the sink.

use crate::types::{AudioTrackInfo, SourceKind, TextTrackInfo, VariantInfo};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// The single platform surface decoded media renders onto
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Assign a URL directly (progressive mp4 or native HLS fallback)
    async fn assign_url(&self, url: &Url) -> Result<()>;
    /// Clear any assigned source reference
    async fn clear_source(&self) -> Result<()>;
    /// Resolves on the sink's first "can play" signal for the current source
    async fn await_can_play(&self) -> Result<()>;

    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn seek(&self, position_secs: f64) -> Result<()>;
    async fn set_volume(&self, volume: f64) -> Result<()>;
    async fn set_muted(&self, muted: bool) -> Result<()>;
    async fn set_playback_rate(&self, rate: f64) -> Result<()>;

    async fn position_secs(&self) -> f64;
    async fn duration_secs(&self) -> Option<f64>;
    async fn buffered_secs(&self) -> f64;
    async fn is_playing(&self) -> bool;
}

/// One adaptive-streaming engine instance (HLS or DASH)
#[async_trait]
pub trait StreamingEngine: Send + Sync {
    async fn attach(&self, sink: Arc<dyn MediaSink>) -> Result<()>;
    async fn load(&self, manifest: &Url) -> Result<()>;
    async fn unload(&self) -> Result<()>;
    async fn detach(&self) -> Result<()>;
    async fn destroy(&self) -> Result<()>;

    /// Variants offered by the manifest
    async fn variants(&self) -> Vec<VariantInfo>;
    /// Enable/disable the engine's internal ABR loop
    async fn set_auto_switching(&self, enabled: bool) -> Result<()>;
    /// Force-select one variant (implies ABR disabled)
    async fn select_variant(&self, variant_id: &str) -> Result<()>;
    async fn active_variant(&self) -> Option<VariantInfo>;
    /// Seed the engine's internal bandwidth estimate
    async fn seed_bandwidth_estimate(&self, bits_per_second: u64) -> Result<()>;

    async fn audio_tracks(&self) -> Vec<AudioTrackInfo>;
    async fn select_audio(&self, language: &str, role: Option<&str>) -> Result<()>;
    /// The selection the engine actually made (may differ from the request)
    async fn active_audio(&self) -> Option<AudioTrackInfo>;

    async fn text_tracks(&self) -> Vec<TextTrackInfo>;
    async fn select_text(&self, language: &str, role: Option<&str>) -> Result<()>;
    async fn set_text_visible(&self, visible: bool) -> Result<()>;
    async fn clear_text(&self) -> Result<()>;
}

/// Constructs engine instances for adaptive kinds
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, kind: SourceKind) -> Result<Arc<dyn StreamingEngine>>;
}

/// The exclusively-owned engine handle slot. At most one live engine per
/// session manager; the slot is cleared before a replacement is created.
pub type EngineSlot = RwLock<Option<Arc<dyn StreamingEngine>>>;
