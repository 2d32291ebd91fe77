//! Adaptive quality control
//!
//! Bandwidth-driven initial variant seeding, manual quality overrides, and
//! reconciliation with the engine's internal ABR loop. Manual selection and
//! automatic mode hold mutually exclusive authority over the quality label.

use crate::engine::EngineSlot;
use crate::types::{parse_quality_height, VariantInfo};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// Map estimated bandwidth to a target vertical resolution
pub fn target_height_for_bandwidth(bits_per_second: u64) -> u32 {
    match bits_per_second {
        bps if bps >= 5_000_000 => 1080,
        bps if bps >= 2_500_000 => 720,
        bps if bps >= 1_000_000 => 480,
        _ => 360,
    }
}

/// One-shot initial pick at first load: the highest-resolution variant not
/// exceeding `ceiling_factor` times the bandwidth-derived target, falling
/// back to the lowest available variant. The engine's continuous ABR loop
/// takes over immediately after.
pub fn pick_initial_variant<'a>(
    variants: &'a [VariantInfo],
    bits_per_second: u64,
    ceiling_factor: f64,
) -> Option<&'a VariantInfo> {
    if variants.is_empty() {
        return None;
    }
    let target = target_height_for_bandwidth(bits_per_second);
    let ceiling = (target as f64 * ceiling_factor) as u32;

    variants
        .iter()
        .filter(|v| v.height <= ceiling)
        .max_by_key(|v| v.height)
        .or_else(|| variants.iter().min_by_key(|v| v.height))
}

/// Distinct quality labels of a variant ladder, sorted descending
pub fn labels_for_variants(variants: &[VariantInfo]) -> Vec<String> {
    let mut heights: Vec<u32> = variants.iter().map(|v| v.height).collect();
    heights.sort_unstable_by(|a, b| b.cmp(a));
    heights.dedup();
    heights.into_iter().map(|h| format!("{h}p")).collect()
}

/// Quality labels of an mp4 ladder, sorted numerically descending
pub fn labels_for_ladder(ladder: &BTreeMap<String, Url>) -> Vec<String> {
    let mut labels: Vec<&String> = ladder.keys().collect();
    labels.sort_by(|a, b| {
        parse_quality_height(b)
            .unwrap_or(0)
            .cmp(&parse_quality_height(a).unwrap_or(0))
    });
    labels.into_iter().cloned().collect()
}

/// Initial quality for an mp4 ladder: the preferred default when present,
/// otherwise the highest available label
pub fn default_ladder_quality(ladder: &BTreeMap<String, Url>, preferred: &str) -> Option<String> {
    if ladder.contains_key(preferred) {
        return Some(preferred.to_string());
    }
    labels_for_ladder(ladder).into_iter().next()
}

/// Current quality authority
#[derive(Debug, Clone, Default)]
struct QualityState {
    current: Option<String>,
    auto: bool,
}

/// Manual/automatic quality controller over the shared engine slot
pub struct QualityController {
    engine: Arc<EngineSlot>,
    ceiling_factor: f64,
    state: RwLock<QualityState>,
}

impl QualityController {
    pub fn new(engine: Arc<EngineSlot>, ceiling_factor: f64) -> Self {
        Self {
            engine,
            ceiling_factor,
            state: RwLock::new(QualityState {
                current: None,
                auto: true,
            }),
        }
    }

    pub async fn current_quality(&self) -> Option<String> {
        self.state.read().await.current.clone()
    }

    pub async fn is_auto(&self) -> bool {
        self.state.read().await.auto
    }

    /// Record the quality label without touching the engine or the
    /// automatic flag (initial mp4 ladder pick)
    pub async fn note_quality(&self, label: &str) {
        self.state.write().await.current = Some(label.to_string());
    }

    /// Record a manual quality label without touching the engine (mp4
    /// path, where the session manager owns the URL swap)
    pub async fn note_manual_quality(&self, label: &str) {
        let mut state = self.state.write().await;
        state.current = Some(label.to_string());
        state.auto = false;
    }

    /// Flip quality authority without an engine call (progressive sources)
    pub async fn set_auto_flag(&self, auto: bool) {
        self.state.write().await.auto = auto;
    }

    /// Reset for a fresh attach
    pub async fn reset(&self, auto: bool) {
        let mut state = self.state.write().await;
        state.current = None;
        state.auto = auto;
    }

    /// Quality labels offered by the live engine
    pub async fn available_qualities(&self) -> Vec<String> {
        match self.engine.read().await.as_ref() {
            Some(engine) => labels_for_variants(&engine.variants().await),
            None => Vec::new(),
        }
    }

    /// Manual selection for adaptive kinds: disable the engine's ABR,
    /// force the variant whose height matches the requested label
    pub async fn select_manual(&self, label: &str) -> Result<()> {
        let engine_guard = self.engine.read().await;
        let engine = engine_guard.as_ref().ok_or(Error::NoEngine)?;

        let height = parse_quality_height(label).ok_or_else(|| Error::NoQualityUrl {
            quality: label.to_string(),
        })?;

        engine.set_auto_switching(false).await?;
        let variants = engine.variants().await;
        let variant = variants
            .iter()
            .find(|v| v.height == height)
            .ok_or_else(|| Error::NoQualityUrl {
                quality: label.to_string(),
            })?;
        engine.select_variant(&variant.id).await?;

        info!(quality = label, "Manual quality selected");
        let mut state = self.state.write().await;
        state.current = Some(label.to_string());
        state.auto = false;
        Ok(())
    }

    /// Re-enable the engine's internal ABR, seeded with the current
    /// bandwidth estimate
    pub async fn enable_auto(&self, seed_bps: u64) -> Result<()> {
        let engine_guard = self.engine.read().await;
        let engine = engine_guard.as_ref().ok_or(Error::NoEngine)?;

        engine.seed_bandwidth_estimate(seed_bps).await?;
        engine.set_auto_switching(true).await?;

        info!(seed_mbps = seed_bps as f64 / 1_000_000.0, "Automatic quality enabled");
        let mut state = self.state.write().await;
        state.auto = true;
        Ok(())
    }

    /// Seed the freshly loaded engine once: pick the bandwidth-matched
    /// initial variant, then hand control to the engine's ABR loop
    pub async fn seed_initial(&self, seed_bps: u64) -> Result<()> {
        let engine_guard = self.engine.read().await;
        let engine = engine_guard.as_ref().ok_or(Error::NoEngine)?;

        engine.seed_bandwidth_estimate(seed_bps).await?;
        let variants = engine.variants().await;
        if let Some(variant) = pick_initial_variant(&variants, seed_bps, self.ceiling_factor) {
            debug!(
                variant = %variant.id,
                height = variant.height,
                "Initial variant seeded"
            );
            engine.select_variant(&variant.id).await?;
            let mut state = self.state.write().await;
            state.current = Some(variant.quality_label());
        }
        engine.set_auto_switching(true).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder_variants(heights: &[u32]) -> Vec<VariantInfo> {
        heights
            .iter()
            .map(|&h| VariantInfo {
                id: format!("v{h}"),
                height: h,
                bandwidth: h as u64 * 5_000,
            })
            .collect()
    }

    #[test]
    fn test_bandwidth_to_target_height() {
        assert_eq!(target_height_for_bandwidth(6_000_000), 1080);
        assert_eq!(target_height_for_bandwidth(3_000_000), 720);
        assert_eq!(target_height_for_bandwidth(1_200_000), 480);
        assert_eq!(target_height_for_bandwidth(500_000), 360);
    }

    #[test]
    fn test_initial_pick_respects_ceiling() {
        let variants = ladder_variants(&[360, 480, 720, 1080]);

        // 6 Mbps -> target 1080, ceiling 1296: 1080 qualifies
        let pick = pick_initial_variant(&variants, 6_000_000, 1.2).unwrap();
        assert_eq!(pick.height, 1080);

        // 3 Mbps -> target 720, ceiling 864: 720 is the highest match
        let pick = pick_initial_variant(&variants, 3_000_000, 1.2).unwrap();
        assert_eq!(pick.height, 720);

        let pick = pick_initial_variant(&variants, 1_200_000, 1.2).unwrap();
        assert_eq!(pick.height, 480);

        let pick = pick_initial_variant(&variants, 500_000, 1.2).unwrap();
        assert_eq!(pick.height, 360);
    }

    #[test]
    fn test_initial_pick_falls_back_to_lowest() {
        // Nothing under the ceiling: take the lowest available variant
        let variants = ladder_variants(&[1440, 2160]);
        let pick = pick_initial_variant(&variants, 500_000, 1.2).unwrap();
        assert_eq!(pick.height, 1440);

        assert!(pick_initial_variant(&[], 5_000_000, 1.2).is_none());
    }

    #[test]
    fn test_variant_labels_sorted_descending() {
        let variants = ladder_variants(&[480, 1080, 720, 480]);
        assert_eq!(labels_for_variants(&variants), vec!["1080p", "720p", "480p"]);
    }

    #[test]
    fn test_ladder_labels_numeric_sort() {
        let ladder: BTreeMap<String, Url> = [
            ("480p", "https://cdn.example.com/480.mp4"),
            ("1080p", "https://cdn.example.com/1080.mp4"),
            ("720p", "https://cdn.example.com/720.mp4"),
        ]
        .into_iter()
        .map(|(label, url)| (label.to_string(), Url::parse(url).unwrap()))
        .collect();

        // Lexicographic order would put "1080p" last; numeric order must not
        assert_eq!(labels_for_ladder(&ladder), vec!["1080p", "720p", "480p"]);
    }

    #[test]
    fn test_default_ladder_quality() {
        let ladder: BTreeMap<String, Url> = [
            ("480p", "https://cdn.example.com/480.mp4"),
            ("1080p", "https://cdn.example.com/1080.mp4"),
            ("720p", "https://cdn.example.com/720.mp4"),
        ]
        .into_iter()
        .map(|(label, url)| (label.to_string(), Url::parse(url).unwrap()))
        .collect();

        assert_eq!(default_ladder_quality(&ladder, "720p").as_deref(), Some("720p"));

        let no_720: BTreeMap<String, Url> = ladder
            .iter()
            .filter(|(label, _)| label.as_str() != "720p")
            .map(|(l, u)| (l.clone(), u.clone()))
            .collect();
        assert_eq!(default_ladder_quality(&no_720, "720p").as_deref(), Some("1080p"));
    }
}
