//! Entitlement gating
//!
//! Decides whether playback may proceed from the access policy plus
//! entitlement facts supplied by external collaborators, and owns the
//! one protected-resolution call that turns a gated candidate into a
//! playable source. Lock status is recomputed on every evaluation and
//! never decided on partially loaded facts.

use crate::source::infer_kind;
use crate::types::{AccessPolicy, AccessType, MediaRef, PlayableSource, SourceKind};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Why a title is locked for the current user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// Rental required (subscription does not substitute, or is absent)
    RequiresRental,
    /// Active subscription required
    RequiresSubscription,
    /// Concurrent-stream limit reached on another device
    StreamLimit,
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockReason::RequiresRental => write!(f, "requires_rental"),
            LockReason::RequiresSubscription => write!(f, "requires_subscription"),
            LockReason::StreamLimit => write!(f, "stream_limit"),
        }
    }
}

/// Entitlement gate states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Unknown,
    /// Facts are loading; never decide lock status here
    Evaluating,
    Locked(LockReason),
    /// Free content; the candidate's own URLs are used directly
    UnlockedFree,
    /// Gated content; resolution call in flight
    UnlockedResolving,
    /// Resolution succeeded; a playable source is available
    UnlockedReady,
    /// Resolution failed; message surfaced verbatim, no automatic retry
    UnlockedFailed(String),
}

impl GateState {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, GateState::UnlockedFree | GateState::UnlockedReady)
    }
}

/// Entitlement facts for one scope (movie or series)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntitlementFacts {
    pub subscription_active: bool,
    pub rental_active: bool,
    pub can_stream: bool,
}

/// Facts are eventually consistent; `Loading` keeps the gate in
/// `Evaluating` until the collaborators have answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactsState {
    Loading,
    Loaded(EntitlementFacts),
}

/// External feed of entitlement facts (subscription, rental, device limit)
#[async_trait]
pub trait EntitlementFactsFeed: Send + Sync {
    async fn facts(&self, media: &MediaRef) -> FactsState;
}

/// Protected-resolution request wire shape
#[derive(Debug, Clone, Serialize)]
pub struct ResolveRequest {
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<String>,
    pub media_id: String,
    pub media_type: String,
    pub access_type: AccessType,
    pub exclude_from_plan: bool,
}

/// Source payload of a successful resolution response
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedSourcePayload {
    pub id: String,
    pub server_name: String,
    pub source_type: Option<String>,
    pub url: Option<String>,
    pub quality_urls: Option<HashMap<String, String>>,
    pub quality: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Protected-resolution response wire shape
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveResponse {
    pub success: bool,
    pub source: Option<ResolvedSourcePayload>,
    pub error: Option<String>,
}

/// External entitlement-resolution collaborator.
///
/// Must never be called for `access_type = free`.
#[async_trait]
pub trait EntitlementResolver: Send + Sync {
    async fn resolve(&self, request: ResolveRequest) -> Result<ResolveResponse>;
}

/// Lock decision table; `can_stream` gates everything
pub fn lock_reason(policy: &AccessPolicy, facts: &EntitlementFacts) -> Option<LockReason> {
    if !facts.can_stream {
        return Some(LockReason::StreamLimit);
    }
    match policy.access_type {
        AccessType::Free => None,
        AccessType::Rent => {
            if policy.exclude_from_plan {
                if facts.rental_active {
                    None
                } else {
                    Some(LockReason::RequiresRental)
                }
            } else if facts.subscription_active || facts.rental_active {
                None
            } else {
                Some(LockReason::RequiresRental)
            }
        }
        AccessType::Vip => {
            if facts.subscription_active {
                None
            } else {
                Some(LockReason::RequiresSubscription)
            }
        }
    }
}

/// The gate for one candidate source.
///
/// `reset` must be called when the candidate changes; `resolved_source`
/// transitions None -> Some exactly once per candidate.
pub struct EntitlementGate {
    resolver: std::sync::Arc<dyn EntitlementResolver>,
    facts_feed: std::sync::Arc<dyn EntitlementFactsFeed>,
    state_tx: watch::Sender<GateState>,
    resolved: RwLock<Option<PlayableSource>>,
    resolution_issued: AtomicBool,
}

impl EntitlementGate {
    pub fn new(
        resolver: std::sync::Arc<dyn EntitlementResolver>,
        facts_feed: std::sync::Arc<dyn EntitlementFactsFeed>,
    ) -> Self {
        let (state_tx, _) = watch::channel(GateState::Unknown);
        Self {
            resolver,
            facts_feed,
            state_tx,
            resolved: RwLock::new(None),
            resolution_issued: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> GateState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state_tx.subscribe()
    }

    /// Lock reason, if the last evaluation locked
    pub fn lock_state(&self) -> Option<LockReason> {
        match self.state() {
            GateState::Locked(reason) => Some(reason),
            _ => None,
        }
    }

    /// The playable source produced by a passed gate
    pub async fn resolved_source(&self) -> Option<PlayableSource> {
        self.resolved.read().await.clone()
    }

    /// Forget the previous candidate's outcome
    pub async fn reset(&self) {
        *self.resolved.write().await = None;
        self.resolution_issued.store(false, Ordering::SeqCst);
        self.state_tx.send_replace(GateState::Unknown);
    }

    fn set_state(&self, state: GateState) {
        debug!(state = ?state, "Gate state");
        // send_replace: the state must land even when no receiver is
        // subscribed
        self.state_tx.send_replace(state);
    }

    /// Evaluate the gate for a candidate.
    ///
    /// Returns the resulting state; `Evaluating` means facts are still
    /// loading and the caller should re-evaluate when they settle. The
    /// resolution call for gated content is issued at most once per
    /// candidate; re-evaluation after `UnlockedReady`/`UnlockedFailed`
    /// returns the recorded outcome without a second call.
    #[instrument(skip(self, candidate, policy), fields(source_id = %candidate.id))]
    pub async fn evaluate(
        &self,
        candidate: &PlayableSource,
        media: &MediaRef,
        policy: &AccessPolicy,
    ) -> GateState {
        // A settled outcome is sticky for this candidate
        match self.state() {
            state @ (GateState::UnlockedFree
            | GateState::UnlockedReady
            | GateState::UnlockedFailed(_)) => return state,
            _ => {}
        }

        self.set_state(GateState::Evaluating);

        let facts = match self.facts_feed.facts(media).await {
            FactsState::Loaded(facts) => facts,
            FactsState::Loading => {
                debug!("Entitlement facts still loading");
                return GateState::Evaluating;
            }
        };

        if let Some(reason) = lock_reason(policy, &facts) {
            info!(reason = %reason, "Content locked");
            self.set_state(GateState::Locked(reason));
            return GateState::Locked(reason);
        }

        if policy.is_free() {
            // Free content was normalized with its URLs intact
            *self.resolved.write().await = Some(candidate.clone());
            self.set_state(GateState::UnlockedFree);
            return GateState::UnlockedFree;
        }

        if self.resolution_issued.swap(true, Ordering::SeqCst) {
            // A call is already in flight for this candidate
            return self.state();
        }

        self.set_state(GateState::UnlockedResolving);
        let request = build_resolve_request(candidate, media, policy);
        let state = match self.resolver.resolve(request).await {
            Ok(response) if response.success => match response.source {
                Some(payload) => {
                    let source = source_from_payload(payload, candidate);
                    info!(source_id = %source.id, kind = %source.kind, "Source resolved");
                    *self.resolved.write().await = Some(source);
                    GateState::UnlockedReady
                }
                None => GateState::UnlockedFailed(Error::EmptyResolution.to_string()),
            },
            Ok(response) => {
                let message = response
                    .error
                    .unwrap_or_else(|| "resolution rejected".to_string());
                warn!(error = %message, "Resolution rejected");
                GateState::UnlockedFailed(message)
            }
            Err(e) => {
                warn!(error = %e, "Resolution call failed");
                GateState::UnlockedFailed(e.to_string())
            }
        };

        self.set_state(state.clone());
        state
    }
}

fn build_resolve_request(
    candidate: &PlayableSource,
    media: &MediaRef,
    policy: &AccessPolicy,
) -> ResolveRequest {
    let (episode_id, movie_id) = match media {
        MediaRef::Movie { movie_id } => (None, Some(movie_id.clone())),
        MediaRef::Episode { episode_id, .. } => (Some(episode_id.clone()), None),
    };
    ResolveRequest {
        source_id: candidate.id.clone(),
        episode_id,
        movie_id,
        media_id: media.scope_id().to_string(),
        media_type: media.media_type().to_string(),
        access_type: policy.access_type,
        exclude_from_plan: policy.exclude_from_plan,
    }
}

/// Build the playable source from a resolution payload, falling back to
/// the candidate for fields the response omits
fn source_from_payload(payload: ResolvedSourcePayload, candidate: &PlayableSource) -> PlayableSource {
    let direct_url = payload.url.as_deref().and_then(|u| Url::parse(u).ok());
    let kind = match payload.source_type.as_deref() {
        Some(_) => infer_kind(payload.source_type.as_deref(), direct_url.as_ref()),
        None => candidate.kind,
    };

    let quality_urls = if kind == SourceKind::Mp4 {
        payload.quality_urls.as_ref().and_then(|map| {
            let parsed: BTreeMap<String, Url> = map
                .iter()
                .filter_map(|(label, url)| Url::parse(url).ok().map(|u| (label.clone(), u)))
                .collect();
            if parsed.is_empty() {
                None
            } else {
                Some(parsed)
            }
        })
    } else {
        None
    };

    PlayableSource {
        id: payload.id,
        label: payload.server_name,
        kind,
        direct_url,
        quality_urls,
        is_default: payload.is_default,
    }
}
