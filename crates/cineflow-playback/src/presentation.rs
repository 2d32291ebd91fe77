//! Presentation-mode control
//!
//! Fullscreen, picture-in-picture, and orientation transitions. These act
//! only on the platform surface; they never touch the engine handle or the
//! session state machine, so an in-flight playback session is never
//! interrupted by a mode change.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Platform hooks for presentation transitions
#[async_trait]
pub trait PresentationSurface: Send + Sync {
    async fn enter_fullscreen(&self) -> Result<()>;
    async fn exit_fullscreen(&self) -> Result<()>;
    async fn enter_picture_in_picture(&self) -> Result<()>;
    async fn exit_picture_in_picture(&self) -> Result<()>;
    /// Lock to landscape while fullscreen (no-op on desktop surfaces)
    async fn lock_landscape(&self) -> Result<()>;
    async fn unlock_orientation(&self) -> Result<()>;
}

/// Current presentation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentationMode {
    #[default]
    Inline,
    Fullscreen,
    PictureInPicture,
}

/// Presentation-mode controller
pub struct PresentationController {
    surface: Arc<dyn PresentationSurface>,
    mode: RwLock<PresentationMode>,
}

impl PresentationController {
    pub fn new(surface: Arc<dyn PresentationSurface>) -> Self {
        Self {
            surface,
            mode: RwLock::new(PresentationMode::Inline),
        }
    }

    pub async fn mode(&self) -> PresentationMode {
        *self.mode.read().await
    }

    pub async fn toggle_fullscreen(&self) -> Result<()> {
        let mut mode = self.mode.write().await;
        match *mode {
            PresentationMode::Fullscreen => {
                self.surface.exit_fullscreen().await?;
                if let Err(e) = self.surface.unlock_orientation().await {
                    warn!(error = %e, "Orientation unlock failed");
                }
                *mode = PresentationMode::Inline;
            }
            _ => {
                if *mode == PresentationMode::PictureInPicture {
                    self.surface.exit_picture_in_picture().await?;
                }
                self.surface.enter_fullscreen().await?;
                if let Err(e) = self.surface.lock_landscape().await {
                    warn!(error = %e, "Orientation lock failed");
                }
                *mode = PresentationMode::Fullscreen;
            }
        }
        info!(mode = ?*mode, "Presentation mode changed");
        Ok(())
    }

    pub async fn toggle_picture_in_picture(&self) -> Result<()> {
        let mut mode = self.mode.write().await;
        match *mode {
            PresentationMode::PictureInPicture => {
                self.surface.exit_picture_in_picture().await?;
                *mode = PresentationMode::Inline;
            }
            _ => {
                if *mode == PresentationMode::Fullscreen {
                    self.surface.exit_fullscreen().await?;
                    if let Err(e) = self.surface.unlock_orientation().await {
                        warn!(error = %e, "Orientation unlock failed");
                    }
                }
                self.surface.enter_picture_in_picture().await?;
                *mode = PresentationMode::PictureInPicture;
            }
        }
        info!(mode = ?*mode, "Presentation mode changed");
        Ok(())
    }

    /// Return to inline on teardown; best-effort
    pub async fn reset(&self) {
        let mut mode = self.mode.write().await;
        match *mode {
            PresentationMode::Fullscreen => {
                if let Err(e) = self.surface.exit_fullscreen().await {
                    warn!(error = %e, "Fullscreen exit failed");
                }
                let _ = self.surface.unlock_orientation().await;
            }
            PresentationMode::PictureInPicture => {
                if let Err(e) = self.surface.exit_picture_in_picture().await {
                    warn!(error = %e, "Picture-in-picture exit failed");
                }
            }
            PresentationMode::Inline => {}
        }
        *mode = PresentationMode::Inline;
    }
}
