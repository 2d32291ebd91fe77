//! Core types for the playback session manager

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use url::Url;
use uuid::Uuid;

/// Unique identifier for a playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery kind of a playable source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Progressive MP4, optionally with a per-quality URL ladder
    Mp4,
    /// HLS manifest, quality switching delegated to the engine
    Hls,
    /// DASH manifest, quality switching delegated to the engine
    Dash,
    /// Opaque external player surface; excluded from session/quality/track logic
    Embed,
}

impl SourceKind {
    /// Kinds that require an adaptive-streaming engine
    pub fn is_adaptive(&self) -> bool {
        matches!(self, SourceKind::Hls | SourceKind::Dash)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Mp4 => write!(f, "mp4"),
            SourceKind::Hls => write!(f, "hls"),
            SourceKind::Dash => write!(f, "dash"),
            SourceKind::Embed => write!(f, "embed"),
        }
    }
}

/// One deliverable rendition of a title
///
/// For `kind` in {hls, dash} at most one URL (the manifest) is carried;
/// `quality_urls` is meaningful only for `kind = mp4`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayableSource {
    /// Opaque identifier, unique within a title's source list
    pub id: String,
    /// Human-readable origin/server name
    pub label: String,
    /// Delivery kind
    pub kind: SourceKind,
    /// Directly playable URL; absent for gated content until resolved
    pub direct_url: Option<Url>,
    /// Quality label -> URL ladder (mp4 only)
    pub quality_urls: Option<BTreeMap<String, Url>>,
    /// Tie-break preference flag
    pub is_default: bool,
}

impl PlayableSource {
    /// Returns true if this source carries any playable URL
    pub fn has_url(&self) -> bool {
        self.direct_url.is_some()
            || self
                .quality_urls
                .as_ref()
                .map(|m| !m.is_empty())
                .unwrap_or(false)
    }
}

/// Access classification of a title or episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Free,
    Rent,
    Vip,
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessType::Free => write!(f, "free"),
            AccessType::Rent => write!(f, "rent"),
            AccessType::Vip => write!(f, "vip"),
        }
    }
}

/// Access-policy attributes of the title/episode being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub access_type: AccessType,
    /// When true under `rent`, an active subscription does not substitute
    /// for a rental
    pub exclude_from_plan: bool,
}

impl AccessPolicy {
    pub fn free() -> Self {
        Self {
            access_type: AccessType::Free,
            exclude_from_plan: false,
        }
    }

    pub fn is_free(&self) -> bool {
        self.access_type == AccessType::Free
    }
}

/// What is being played, with the scope entitlement facts apply to:
/// title-level for movies, series-level for episodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MediaRef {
    Movie {
        movie_id: String,
    },
    Episode {
        episode_id: String,
        series_id: String,
    },
}

impl MediaRef {
    /// Media type string used on the resolution wire
    pub fn media_type(&self) -> &'static str {
        match self {
            MediaRef::Movie { .. } => "movie",
            MediaRef::Episode { .. } => "series",
        }
    }

    /// Identifier of the entitlement scope (movie or series)
    pub fn scope_id(&self) -> &str {
        match self {
            MediaRef::Movie { movie_id } => movie_id,
            MediaRef::Episode { series_id, .. } => series_id,
        }
    }

    /// Identifier keying watch-history records
    pub fn history_id(&self) -> &str {
        match self {
            MediaRef::Movie { movie_id } => movie_id,
            MediaRef::Episode { episode_id, .. } => episode_id,
        }
    }
}

/// Most recent network throughput estimate; no history window is kept
#[derive(Debug, Clone, Copy)]
pub struct BandwidthSample {
    /// Estimated throughput in bits per second
    pub bits_per_second: u64,
    /// When the sample was taken
    pub measured_at: Instant,
}

impl BandwidthSample {
    pub fn new(bits_per_second: u64) -> Self {
        Self {
            bits_per_second,
            measured_at: Instant::now(),
        }
    }

    pub fn mbps(&self) -> f64 {
        self.bits_per_second as f64 / 1_000_000.0
    }
}

/// One variant (resolution/bitrate combination) exposed by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantInfo {
    /// Engine-assigned variant identifier
    pub id: String,
    /// Vertical resolution in pixels
    pub height: u32,
    /// Declared bandwidth in bits per second
    pub bandwidth: u64,
}

impl VariantInfo {
    /// Quality label derived from the vertical resolution
    pub fn quality_label(&self) -> String {
        format!("{}p", self.height)
    }
}

/// Audio track descriptor (language/role pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    pub language: String,
    pub role: Option<String>,
}

/// Text track descriptor (language/role pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextTrackInfo {
    pub language: String,
    pub role: Option<String>,
}

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No title selected
    Idle,
    /// Title selected, waiting on the entitlement gate
    AwaitingSource,
    /// Teardown + attach sequence in flight
    Attaching,
    /// Engine (or direct sink assignment) live and playable
    Ready,
    /// Re-entering teardown + attach for a source/quality change
    Switching,
    /// Consumer unmounted; terminal
    TornDown,
    /// Attach failed; recoverable only by a new selection
    Failed,
}

impl SessionState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        if target == TornDown {
            // Unmount is legal from anywhere; TornDown itself is terminal
            return *self != TornDown;
        }
        matches!(
            (self, target),
            (Idle, AwaitingSource)
                | (AwaitingSource, Attaching)
                | (AwaitingSource, AwaitingSource)
                | (AwaitingSource, Failed)
                | (Attaching, Ready)
                | (Attaching, Failed)
                | (Attaching, AwaitingSource)
                | (Ready, Switching)
                | (Ready, AwaitingSource)
                | (Switching, Ready)
                | (Switching, Failed)
                | (Switching, AwaitingSource)
                | (Failed, AwaitingSource)
        )
    }

    /// States in which the consumer should show a loading indicator
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingSource | SessionState::Attaching | SessionState::Switching
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::AwaitingSource => write!(f, "awaiting_source"),
            SessionState::Attaching => write!(f, "attaching"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Switching => write!(f, "switching"),
            SessionState::TornDown => write!(f, "torn_down"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Position and play-intent captured immediately before a teardown and
/// restored after the replacement engine reaches ready
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSnapshot {
    pub position_secs: f64,
    pub was_playing: bool,
}

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bandwidth estimate refresh interval
    pub bandwidth_refresh_interval: Duration,
    /// Progress save interval
    pub progress_save_interval: Duration,
    /// Minimum saved position before resume applies (seconds)
    pub resume_min_position_secs: f64,
    /// Remaining time under which a title counts as completed (seconds)
    pub completed_remaining_secs: f64,
    /// Conservative bandwidth default when no estimate is available (bps)
    pub default_bandwidth_bps: u64,
    /// Variants above target_height * ceiling are excluded from the
    /// initial automatic pick
    pub quality_ceiling_factor: f64,
    /// Preferred quality when an mp4 ladder carries it
    pub preferred_default_quality: String,
    /// Reference payload for the bandwidth probe fallback
    pub probe_url: Option<Url>,
    /// Bandwidth probe request timeout
    pub probe_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bandwidth_refresh_interval: Duration::from_secs(30),
            progress_save_interval: Duration::from_secs(10),
            resume_min_position_secs: 10.0,
            completed_remaining_secs: 30.0,
            default_bandwidth_bps: 5_000_000,
            quality_ceiling_factor: 1.2,
            preferred_default_quality: "720p".to_string(),
            probe_url: None,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Parse the numeric height out of a quality label ("1080p" -> 1080)
pub fn parse_quality_height(label: &str) -> Option<u32> {
    label
        .trim_end_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
}
