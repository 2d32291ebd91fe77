//! Playback session manager
//!
//! Owns the lifecycle of exactly one engine instance at a time: a title
//! selection flows through normalization and the entitlement gate, then
//! the resolved source enters the teardown + attach sequence. Every async
//! continuation is guarded by an epoch counter so a completion issued for
//! an abandoned selection can never overwrite the current session, and an
//! attach mutex keeps at most one teardown + attach sequence in flight.

use crate::{
    bandwidth::{BandwidthEstimator, ThroughputHint},
    engine::{EngineFactory, EngineSlot, MediaSink},
    entitlement::{
        EntitlementFactsFeed, EntitlementGate, EntitlementResolver, GateState, LockReason,
    },
    presentation::{PresentationController, PresentationMode, PresentationSurface},
    progress::{ProgressRecorder, WatchHistoryStore},
    quality::{self, QualityController},
    source::{normalize_sources, pick_candidate, RawSource},
    tracks::{TextSelection, TrackController},
    types::*,
    Error, Result,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Session manager for one player surface
pub struct SessionManager {
    /// Unique session-manager instance ID
    id: SessionId,
    config: SessionConfig,
    /// The single media surface; exclusively owned
    sink: Arc<dyn MediaSink>,
    factory: Arc<dyn EngineFactory>,
    gate: EntitlementGate,
    bandwidth: Arc<BandwidthEstimator>,
    progress: Arc<ProgressRecorder>,
    quality: QualityController,
    tracks: TrackController,
    presentation: RwLock<Option<PresentationController>>,
    /// At most one live engine at any time
    engine: Arc<EngineSlot>,
    state_tx: watch::Sender<SessionState>,
    sources: RwLock<Vec<PlayableSource>>,
    candidate: RwLock<Option<PlayableSource>>,
    resolved: RwLock<Option<PlayableSource>>,
    policy: RwLock<Option<AccessPolicy>>,
    media: RwLock<Option<MediaRef>>,
    identity: RwLock<Option<String>>,
    /// HLS degraded to native sink playback; engine-based calls are off
    native_fallback: AtomicBool,
    /// Generation counter; bumped on every new selection and on teardown
    epoch: AtomicU64,
    /// Serializes teardown + attach sequences
    attach_lock: Mutex<()>,
    /// Recurring tasks cleared exactly once on teardown
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        sink: Arc<dyn MediaSink>,
        factory: Arc<dyn EngineFactory>,
        resolver: Arc<dyn EntitlementResolver>,
        facts_feed: Arc<dyn EntitlementFactsFeed>,
        history: Arc<dyn WatchHistoryStore>,
        hint: Option<Arc<dyn ThroughputHint>>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let engine: Arc<EngineSlot> = Arc::new(RwLock::new(None));
        let bandwidth = Arc::new(BandwidthEstimator::new(&config, hint));
        let progress = Arc::new(ProgressRecorder::new(
            history,
            config.progress_save_interval,
            config.resume_min_position_secs,
            config.completed_remaining_secs,
        ));

        let bandwidth_task = bandwidth.spawn_refresh(config.bandwidth_refresh_interval);

        Self {
            id: SessionId::new(),
            quality: QualityController::new(Arc::clone(&engine), config.quality_ceiling_factor),
            tracks: TrackController::new(Arc::clone(&engine)),
            presentation: RwLock::new(None),
            config,
            sink,
            factory,
            gate: EntitlementGate::new(resolver, facts_feed),
            bandwidth,
            progress,
            engine,
            state_tx,
            sources: RwLock::new(Vec::new()),
            candidate: RwLock::new(None),
            resolved: RwLock::new(None),
            policy: RwLock::new(None),
            media: RwLock::new(None),
            identity: RwLock::new(None),
            native_fallback: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            attach_lock: Mutex::new(()),
            tasks: std::sync::Mutex::new(vec![bandwidth_task]),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Loading indicator for UI chrome (distinct from a failed state)
    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    fn set_state(&self, new_state: SessionState) -> Result<()> {
        let current = self.state();
        if !current.can_transition_to(new_state) {
            return Err(Error::InvalidStateTransition {
                from: current.to_string(),
                to: new_state.to_string(),
            });
        }
        // send_replace: the new state must land even when no receiver
        // is subscribed
        self.state_tx.send_replace(new_state);
        info!(from = %current, to = %new_state, "Session state transition");
        Ok(())
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Identity used for watch-history keys; progress recording only runs
    /// while one is known
    pub async fn set_identity(&self, user_id: Option<String>) {
        *self.identity.write().await = user_id;
    }

    // =========================================================================
    // Selection and gating
    // =========================================================================

    /// A title/episode became selected. Normalizes the raw source records,
    /// picks the candidate, and drives the entitlement gate; on gate
    /// success the resolved source enters the attach sequence.
    #[instrument(skip(self, raw_sources, policy, media), fields(session_id = %self.id))]
    pub async fn select_title(
        &self,
        raw_sources: &[RawSource],
        policy: AccessPolicy,
        media: MediaRef,
        preferred_source: Option<&str>,
    ) -> Result<()> {
        if self.state() == SessionState::TornDown {
            return Err(Error::SessionTornDown);
        }

        let epoch = self.bump_epoch();
        // Final save for whatever was playing before the new title
        self.progress.finish().await;
        self.set_state(SessionState::AwaitingSource)?;

        let sources = normalize_sources(raw_sources, &policy);
        if sources.is_empty() {
            self.set_state(SessionState::Failed)?;
            return Err(Error::NoPlayableSource);
        }

        let candidate = pick_candidate(&sources, preferred_source)
            .cloned()
            .ok_or(Error::NoPlayableSource)?;
        info!(candidate = %candidate.id, kind = %candidate.kind, "Candidate source selected");

        *self.sources.write().await = sources;
        *self.candidate.write().await = Some(candidate);
        *self.resolved.write().await = None;
        *self.policy.write().await = Some(policy);
        *self.media.write().await = Some(media);
        self.gate.reset().await;

        self.drive_gate(epoch, false).await
    }

    /// Entitlement facts changed (subscription loaded, rental granted...).
    /// Re-evaluates the gate for the current candidate.
    pub async fn facts_updated(&self) -> Result<()> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.drive_gate(epoch, false).await
    }

    async fn drive_gate(&self, epoch: u64, preserve: bool) -> Result<()> {
        let candidate = match self.candidate.read().await.clone() {
            Some(candidate) => candidate,
            None => return Err(Error::NoSourceSelected),
        };
        let (media, policy) = match (
            self.media.read().await.clone(),
            *self.policy.read().await,
        ) {
            (Some(media), Some(policy)) => (media, policy),
            _ => return Err(Error::NoSourceSelected),
        };

        let outcome = self.gate.evaluate(&candidate, &media, &policy).await;
        if !self.is_current(epoch) {
            debug!("Stale gate outcome discarded");
            return Ok(());
        }

        match outcome {
            GateState::UnlockedFree | GateState::UnlockedReady => {
                // A settled gate re-evaluated against an already attached
                // source (facts refresh while ready) must not re-attach
                if self.state() == SessionState::Ready && self.resolved.read().await.is_some() {
                    debug!("Gate already settled for the attached source");
                    return Ok(());
                }
                let resolved = self
                    .gate
                    .resolved_source()
                    .await
                    .ok_or(Error::EmptyResolution)?;
                *self.resolved.write().await = Some(resolved);
                self.attach(epoch, preserve).await
            }
            GateState::Evaluating => {
                debug!("Awaiting entitlement facts");
                Ok(())
            }
            GateState::Locked(reason) => {
                info!(reason = %reason, "Playback locked");
                Ok(())
            }
            GateState::UnlockedFailed(message) => {
                warn!(error = %message, "Entitlement resolution failed");
                Ok(())
            }
            GateState::Unknown | GateState::UnlockedResolving => Ok(()),
        }
    }

    /// Gate state for UI chrome (lock overlay, resolution error message)
    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn lock_state(&self) -> Option<LockReason> {
        self.gate.lock_state()
    }

    /// Canonical source list for the server-switch affordance
    pub async fn sources(&self) -> Vec<PlayableSource> {
        self.sources.read().await.clone()
    }

    // =========================================================================
    // Attach / teardown
    // =========================================================================

    /// Teardown + attach sequence. Exactly one runs at a time; a stale
    /// epoch means a newer selection superseded this one and the sequence
    /// is abandoned silently.
    async fn attach(&self, epoch: u64, preserve: bool) -> Result<()> {
        let _guard = self.attach_lock.lock().await;
        if !self.is_current(epoch) {
            debug!("Stale attach discarded");
            return Ok(());
        }

        let target = if self.state() == SessionState::Ready {
            SessionState::Switching
        } else {
            SessionState::Attaching
        };
        self.set_state(target)?;

        // Capture strictly before teardown begins
        let snapshot = if preserve {
            Some(PlaybackSnapshot {
                position_secs: self.sink.position_secs().await,
                was_playing: self.sink.is_playing().await,
            })
        } else {
            None
        };

        self.teardown_engine().await;
        if !self.is_current(epoch) {
            return Ok(());
        }

        let resolved = self
            .resolved
            .read()
            .await
            .clone()
            .ok_or(Error::NoSourceSelected)?;

        self.native_fallback.store(false, Ordering::SeqCst);
        // Captured before the reset clears it; a manual label carries
        // across the switch when the new source offers it
        let carried_quality = self.quality.current_quality().await;
        self.quality.reset(self.quality.is_auto().await).await;
        self.tracks.reset().await;

        let result = match resolved.kind {
            SourceKind::Embed => {
                // The external surface owns playback entirely
                debug!("Embed source; no engine attached");
                Ok(())
            }
            SourceKind::Mp4 => self.attach_mp4(&resolved, carried_quality.as_deref()).await,
            SourceKind::Hls | SourceKind::Dash => {
                self.attach_adaptive(&resolved, carried_quality.as_deref()).await
            }
        };

        if !self.is_current(epoch) {
            return Ok(());
        }

        match result {
            Ok(()) => {
                self.set_state(SessionState::Ready)?;
                // Restore strictly after the new engine signalled ready
                if let Some(snapshot) = snapshot {
                    self.restore_snapshot(snapshot).await;
                } else {
                    self.begin_progress_and_resume().await;
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Attach failed");
                self.set_state(SessionState::Failed)?;
                Err(e)
            }
        }
    }

    /// Unconditional best-effort teardown of any existing engine. Partial
    /// failure never blocks the subsequent attach.
    async fn teardown_engine(&self) {
        let engine = self.engine.write().await.take();
        if let Some(engine) = engine {
            if let Err(e) = self.sink.pause().await {
                warn!(error = %e, "Pause before teardown failed");
            }
            if let Err(e) = engine.unload().await {
                warn!(error = %e, "Engine unload failed");
            }
            if let Err(e) = engine.detach().await {
                warn!(error = %e, "Engine detach failed");
            }
            if let Err(e) = engine.destroy().await {
                warn!(error = %e, "Engine destroy failed");
            }
            debug!("Engine torn down");
        }
        if let Err(e) = self.sink.clear_source().await {
            warn!(error = %e, "Sink source clear failed");
        }
    }

    async fn attach_mp4(&self, resolved: &PlayableSource, carried: Option<&str>) -> Result<()> {
        let url = match resolved.quality_urls {
            Some(ref ladder) => {
                let label = match carried {
                    Some(current) if ladder.contains_key(current) => current.to_string(),
                    _ => quality::default_ladder_quality(
                        ladder,
                        &self.config.preferred_default_quality,
                    )
                    .ok_or(Error::NoPlayableSource)?,
                };
                let url = ladder
                    .get(&label)
                    .cloned()
                    .ok_or_else(|| Error::NoQualityUrl {
                        quality: label.clone(),
                    })?;
                self.quality.note_quality(&label).await;
                url
            }
            None => resolved.direct_url.clone().ok_or(Error::NoPlayableSource)?,
        };

        self.sink.assign_url(&url).await?;
        self.sink.await_can_play().await?;
        debug!(url = %url, "MP4 source assigned");
        Ok(())
    }

    async fn attach_adaptive(&self, resolved: &PlayableSource, carried: Option<&str>) -> Result<()> {
        let manifest = resolved.direct_url.clone().ok_or(Error::NoPlayableSource)?;

        match self.attach_engine(resolved.kind, &manifest, carried).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Drop whatever the failed attempt left behind
                if let Some(engine) = self.engine.write().await.take() {
                    if let Err(err) = engine.destroy().await {
                        warn!(error = %err, "Destroying failed engine failed");
                    }
                }
                if resolved.kind == SourceKind::Hls {
                    // Many sinks play HLS natively; degrade instead of failing
                    warn!(error = %e, "HLS engine failed, falling back to native playback");
                    self.native_fallback.store(true, Ordering::SeqCst);
                    self.sink.assign_url(&manifest).await?;
                    self.sink.await_can_play().await?;
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn attach_engine(
        &self,
        kind: SourceKind,
        manifest: &Url,
        carried: Option<&str>,
    ) -> Result<()> {
        let engine = self.factory.create(kind).await?;
        engine.attach(Arc::clone(&self.sink)).await?;
        *self.engine.write().await = Some(Arc::clone(&engine));

        engine.load(manifest).await.map_err(|e| Error::EngineLoad {
            url: manifest.to_string(),
            message: e.to_string(),
        })?;

        let seed = self.bandwidth.current().bits_per_second;
        if self.quality.is_auto().await {
            self.quality.seed_initial(seed).await?;
        } else if let Some(label) = carried {
            if let Err(e) = self.quality.select_manual(label).await {
                // The prior manual label may not exist on this ladder
                warn!(error = %e, quality = %label, "Carrying manual quality over failed");
            }
        }

        debug!(kind = %kind, manifest = %manifest, "Engine attached and loaded");
        Ok(())
    }

    async fn restore_snapshot(&self, snapshot: PlaybackSnapshot) {
        if let Err(e) = self.sink.seek(snapshot.position_secs).await {
            warn!(error = %e, "Position restore failed");
        }
        let result = if snapshot.was_playing {
            self.sink.play().await
        } else {
            self.sink.pause().await
        };
        if let Err(e) = result {
            warn!(error = %e, "Play-state restore failed");
        }
        debug!(
            position = snapshot.position_secs,
            was_playing = snapshot.was_playing,
            "Playback snapshot restored"
        );
    }

    async fn begin_progress_and_resume(&self) {
        let (identity, media) = (
            self.identity.read().await.clone(),
            self.media.read().await.clone(),
        );
        let (user_id, media) = match (identity, media) {
            (Some(user_id), Some(media)) => (user_id, media),
            _ => return,
        };

        if let Err(e) = self
            .progress
            .start(&user_id, &media, Arc::clone(&self.sink))
            .await
        {
            warn!(error = %e, "Progress recorder start failed");
        }
        if let Some(position) = self.progress.take_resume().await {
            info!(position, "Resuming saved position");
            if let Err(e) = self.sink.seek(position).await {
                warn!(error = %e, "Resume seek failed");
            }
        }
    }

    // =========================================================================
    // Source switch / quality / tracks
    // =========================================================================

    /// Switch to another server for the same title, preserving position
    /// and play intent. Re-selecting the active source is a no-op.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn switch_source(&self, source_id: &str) -> Result<()> {
        let source = self
            .sources
            .read()
            .await
            .iter()
            .find(|s| s.id == source_id)
            .cloned()
            .ok_or_else(|| Error::UnknownSource(source_id.to_string()))?;

        if self.state() == SessionState::Ready {
            if let Some(current) = self.candidate.read().await.as_ref() {
                if current.id == source.id {
                    debug!(source_id, "Re-selected active source; nothing to do");
                    return Ok(());
                }
            }
        }

        let epoch = self.bump_epoch();
        *self.candidate.write().await = Some(source);
        *self.resolved.write().await = None;
        self.gate.reset().await;
        self.drive_gate(epoch, true).await
    }

    /// Manual quality selection; mutually exclusive with automatic mode
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn set_quality(&self, label: &str) -> Result<()> {
        if self.quality.current_quality().await.as_deref() == Some(label)
            && !self.quality.is_auto().await
        {
            return Ok(());
        }
        if self.native_fallback.load(Ordering::SeqCst) {
            return Err(Error::NoEngine);
        }

        let resolved = self
            .resolved
            .read()
            .await
            .clone()
            .ok_or(Error::NoSourceSelected)?;

        match resolved.kind {
            SourceKind::Mp4 => self.set_mp4_quality(&resolved, label).await,
            SourceKind::Hls | SourceKind::Dash => self.quality.select_manual(label).await,
            SourceKind::Embed => Ok(()),
        }
    }

    /// mp4 path: re-resolve the ladder URL and reassign the sink with the
    /// same capture/restore discipline as a source switch
    async fn set_mp4_quality(&self, resolved: &PlayableSource, label: &str) -> Result<()> {
        let ladder = resolved.quality_urls.as_ref().ok_or(Error::NoQualityUrl {
            quality: label.to_string(),
        })?;
        let url = ladder.get(label).cloned().ok_or_else(|| Error::NoQualityUrl {
            quality: label.to_string(),
        })?;

        let _guard = self.attach_lock.lock().await;
        let snapshot = PlaybackSnapshot {
            position_secs: self.sink.position_secs().await,
            was_playing: self.sink.is_playing().await,
        };

        self.set_state(SessionState::Switching)?;
        self.sink.assign_url(&url).await?;
        self.sink.await_can_play().await?;
        self.set_state(SessionState::Ready)?;
        self.restore_snapshot(snapshot).await;

        self.quality.note_manual_quality(label).await;
        Ok(())
    }

    /// Hand quality authority back to the engine's ABR loop, seeded with
    /// the current bandwidth estimate
    pub async fn set_auto_quality(&self, enabled: bool) -> Result<()> {
        if !enabled {
            if let Some(engine) = self.engine.read().await.as_ref() {
                engine.set_auto_switching(false).await?;
            }
            self.quality.set_auto_flag(false).await;
            return Ok(());
        }

        if self.engine.read().await.is_some() {
            self.quality
                .enable_auto(self.bandwidth.current().bits_per_second)
                .await
        } else {
            self.quality.set_auto_flag(true).await;
            Ok(())
        }
    }

    pub async fn current_quality(&self) -> Option<String> {
        self.quality.current_quality().await
    }

    pub async fn auto_quality(&self) -> bool {
        self.quality.is_auto().await
    }

    /// Quality labels offered by the current source, sorted descending
    pub async fn available_qualities(&self) -> Vec<String> {
        let resolved = self.resolved.read().await.clone();
        match resolved {
            Some(PlayableSource {
                kind: SourceKind::Mp4,
                quality_urls: Some(ref ladder),
                ..
            }) => quality::labels_for_ladder(ladder),
            Some(PlayableSource {
                kind: SourceKind::Hls | SourceKind::Dash,
                ..
            }) => self.quality.available_qualities().await,
            _ => Vec::new(),
        }
    }

    pub async fn audio_tracks(&self) -> Vec<AudioTrackInfo> {
        self.tracks.audio_tracks().await
    }

    pub async fn select_audio(
        &self,
        language: &str,
        role: Option<&str>,
    ) -> Result<Option<AudioTrackInfo>> {
        self.tracks.select_audio(language, role).await
    }

    pub async fn active_audio(&self) -> Option<AudioTrackInfo> {
        self.tracks.active_audio().await
    }

    pub async fn text_tracks(&self) -> Vec<TextTrackInfo> {
        self.tracks.text_tracks().await
    }

    pub async fn text_selection(&self) -> TextSelection {
        self.tracks.text_selection().await
    }

    pub async fn select_text(&self, selection: TextSelection) -> Result<()> {
        self.tracks.select_text(selection).await
    }

    // =========================================================================
    // Transport controls (pass-through to the sink)
    // =========================================================================

    pub async fn play(&self) -> Result<()> {
        self.sink.play().await
    }

    pub async fn pause(&self) -> Result<()> {
        self.sink.pause().await
    }

    pub async fn seek(&self, position_secs: f64) -> Result<()> {
        self.sink.seek(position_secs).await
    }

    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        self.sink.set_volume(volume.clamp(0.0, 1.0)).await
    }

    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.sink.set_muted(muted).await
    }

    pub async fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.sink.set_playback_rate(rate).await
    }

    pub async fn position_secs(&self) -> f64 {
        self.sink.position_secs().await
    }

    pub async fn duration_secs(&self) -> Option<f64> {
        self.sink.duration_secs().await
    }

    pub async fn buffered_secs(&self) -> f64 {
        self.sink.buffered_secs().await
    }

    /// Current bandwidth estimate, for diagnostics overlays
    pub fn bandwidth_estimate(&self) -> BandwidthSample {
        self.bandwidth.current()
    }

    // =========================================================================
    // Presentation modes
    // =========================================================================

    /// Bind the platform's presentation hooks. Mode changes act only on
    /// the surface: an in-flight session is never interrupted by them.
    pub async fn set_presentation_surface(&self, surface: Arc<dyn PresentationSurface>) {
        *self.presentation.write().await = Some(PresentationController::new(surface));
    }

    pub async fn presentation_mode(&self) -> PresentationMode {
        match self.presentation.read().await.as_ref() {
            Some(controller) => controller.mode().await,
            None => PresentationMode::Inline,
        }
    }

    pub async fn toggle_fullscreen(&self) -> Result<()> {
        match self.presentation.read().await.as_ref() {
            Some(controller) => controller.toggle_fullscreen().await,
            None => Err(Error::Presentation("no presentation surface bound".into())),
        }
    }

    pub async fn toggle_picture_in_picture(&self) -> Result<()> {
        match self.presentation.read().await.as_ref() {
            Some(controller) => controller.toggle_picture_in_picture().await,
            None => Err(Error::Presentation("no presentation surface bound".into())),
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Consumer unmounted. Clears every recurring task, performs the final
    /// progress save, and tears the engine down. Terminal.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn teardown(&self) -> Result<()> {
        if self.state() == SessionState::TornDown {
            return Ok(());
        }
        self.bump_epoch();

        // Interval timers are cleared exactly once, before the final save
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.progress.finish().await;

        let _guard = self.attach_lock.lock().await;
        self.teardown_engine().await;
        if let Some(controller) = self.presentation.read().await.as_ref() {
            controller.reset().await;
        }
        self.set_state(SessionState::TornDown)?;
        info!("Session torn down");
        Ok(())
    }
}
