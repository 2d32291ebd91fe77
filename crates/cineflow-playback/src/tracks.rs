//! Audio and text track control
//!
//! Track selection is an axis independent of quality. mp4 and embed
//! sources carry no track axis in this design, so every operation here is
//! a no-op without a live engine.

use crate::engine::EngineSlot;
use crate::types::{AudioTrackInfo, TextTrackInfo};
use crate::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Text track selection: off, or one language/role pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextSelection {
    Off,
    Track { language: String, role: Option<String> },
}

/// Track controller over the shared engine slot
pub struct TrackController {
    engine: Arc<EngineSlot>,
    text_selection: RwLock<TextSelection>,
}

impl TrackController {
    pub fn new(engine: Arc<EngineSlot>) -> Self {
        Self {
            engine,
            // Text tracks default to hidden
            text_selection: RwLock::new(TextSelection::Off),
        }
    }

    pub async fn reset(&self) {
        *self.text_selection.write().await = TextSelection::Off;
    }

    /// Audio language/role pairs from the active engine
    pub async fn audio_tracks(&self) -> Vec<AudioTrackInfo> {
        match self.engine.read().await.as_ref() {
            Some(engine) => engine.audio_tracks().await,
            None => Vec::new(),
        }
    }

    /// The audio track the engine currently plays
    pub async fn active_audio(&self) -> Option<AudioTrackInfo> {
        match self.engine.read().await.as_ref() {
            Some(engine) => engine.active_audio().await,
            None => None,
        }
    }

    /// Text language/role pairs from the active engine
    pub async fn text_tracks(&self) -> Vec<TextTrackInfo> {
        match self.engine.read().await.as_ref() {
            Some(engine) => engine.text_tracks().await,
            None => Vec::new(),
        }
    }

    pub async fn text_selection(&self) -> TextSelection {
        self.text_selection.read().await.clone()
    }

    /// Select an audio track; returns the selection the engine actually
    /// made, which may differ when no variant carries the exact pairing
    pub async fn select_audio(
        &self,
        language: &str,
        role: Option<&str>,
    ) -> Result<Option<AudioTrackInfo>> {
        let engine_guard = self.engine.read().await;
        let engine = match engine_guard.as_ref() {
            Some(engine) => engine,
            None => return Ok(None),
        };

        engine.select_audio(language, role).await?;
        let active = engine.active_audio().await;
        info!(requested = language, active = ?active.as_ref().map(|t| &t.language), "Audio track selected");
        Ok(active)
    }

    /// Apply a text selection: `Off` hides and clears; a track selection
    /// makes text visible
    pub async fn select_text(&self, selection: TextSelection) -> Result<()> {
        let engine_guard = self.engine.read().await;
        let engine = match engine_guard.as_ref() {
            Some(engine) => engine,
            None => return Ok(()),
        };

        match &selection {
            TextSelection::Off => {
                engine.set_text_visible(false).await?;
                engine.clear_text().await?;
                debug!("Text tracks off");
            }
            TextSelection::Track { language, role } => {
                engine.select_text(language, role.as_deref()).await?;
                engine.set_text_visible(true).await?;
                debug!(language = %language, "Text track selected");
            }
        }

        *self.text_selection.write().await = selection;
        Ok(())
    }
}
