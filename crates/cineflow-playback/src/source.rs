//! Source normalization
//!
//! Converts heterogeneous raw source records (mixed field names, inferred
//! kinds) into the canonical [`PlayableSource`] list. Pure data shaping:
//! no network access, no entitlement checks. URL stripping for gated
//! content happens here so that nothing reachable before entitlement
//! resolution can carry a playable URL.

use crate::types::{AccessPolicy, PlayableSource, SourceKind};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use url::Url;

/// Hosts that indicate an opaque external player surface
const PORTAL_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "ok.ru",
];

/// Raw source record as delivered by the catalog, with legacy field
/// aliases folded in at the boundary
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSource {
    pub id: Option<String>,
    #[serde(alias = "server_name", alias = "name")]
    pub label: Option<String>,
    #[serde(alias = "source_type", alias = "type")]
    pub kind: Option<String>,
    #[serde(alias = "file", alias = "src")]
    pub url: Option<String>,
    #[serde(alias = "quality_urls", alias = "qualities")]
    pub quality_urls: Option<HashMap<String, String>>,
    #[serde(default, alias = "is_default")]
    pub is_default: bool,
}

/// Fold explicit type aliases into a [`SourceKind`]
fn kind_from_explicit(raw: &str) -> Option<SourceKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "mp4" => Some(SourceKind::Mp4),
        "hls" | "m3u8" => Some(SourceKind::Hls),
        "dash" | "mpd" => Some(SourceKind::Dash),
        "embed" | "iframe" => Some(SourceKind::Embed),
        _ => None,
    }
}

/// Infer a kind from the URL suffix
fn kind_from_suffix(url: &Url) -> Option<SourceKind> {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        Some(SourceKind::Hls)
    } else if path.ends_with(".mpd") {
        Some(SourceKind::Dash)
    } else if path.ends_with(".mp4") {
        Some(SourceKind::Mp4)
    } else {
        None
    }
}

/// Known video-portal host
fn is_portal_host(url: &Url) -> bool {
    url.host_str()
        .map(|host| {
            PORTAL_HOSTS
                .iter()
                .any(|portal| host == *portal || host.ends_with(&format!(".{portal}")))
        })
        .unwrap_or(false)
}

/// Infer the source kind: explicit type field first, then URL suffix,
/// then portal-host pattern, defaulting to HLS
pub fn infer_kind(explicit: Option<&str>, url: Option<&Url>) -> SourceKind {
    if let Some(kind) = explicit.and_then(kind_from_explicit) {
        return kind;
    }
    if let Some(url) = url {
        if let Some(kind) = kind_from_suffix(url) {
            return kind;
        }
        if is_portal_host(url) {
            return SourceKind::Embed;
        }
    }
    SourceKind::Hls
}

/// Normalize a quality ladder: parseable URLs only, empty maps become `None`
fn normalize_quality_urls(raw: Option<&HashMap<String, String>>) -> Option<BTreeMap<String, Url>> {
    let map: BTreeMap<String, Url> = raw?
        .iter()
        .filter_map(|(label, url)| Url::parse(url).ok().map(|u| (label.clone(), u)))
        .collect();
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Produce the canonical source list for one title.
///
/// For non-free content every URL is dropped at this boundary; the only
/// path that may carry a playable URL for gated content is the
/// entitlement-resolution response.
pub fn normalize_sources(raw: &[RawSource], policy: &AccessPolicy) -> Vec<PlayableSource> {
    raw.iter()
        .enumerate()
        .map(|(index, record)| {
            let direct_url = record.url.as_deref().and_then(|u| Url::parse(u).ok());
            let kind = infer_kind(record.kind.as_deref(), direct_url.as_ref());

            // hls/dash carry at most the manifest URL; the ladder belongs
            // to the engine's internal track list
            let quality_urls = if kind == SourceKind::Mp4 {
                normalize_quality_urls(record.quality_urls.as_ref())
            } else {
                None
            };

            let (direct_url, quality_urls) = if policy.is_free() {
                (direct_url, quality_urls)
            } else {
                (None, None)
            };

            let source = PlayableSource {
                id: record
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("src-{index}")),
                label: record
                    .label
                    .clone()
                    .unwrap_or_else(|| format!("Server {}", index + 1)),
                kind,
                direct_url,
                quality_urls,
                is_default: record.is_default,
            };
            debug!(id = %source.id, kind = %source.kind, "Source normalized");
            source
        })
        .collect()
}

/// Pick the candidate source: explicit id, else default flag, else first
pub fn pick_candidate<'a>(
    sources: &'a [PlayableSource],
    preferred_id: Option<&str>,
) -> Option<&'a PlayableSource> {
    if let Some(id) = preferred_id {
        if let Some(source) = sources.iter().find(|s| s.id == id) {
            return Some(source);
        }
    }
    sources
        .iter()
        .find(|s| s.is_default)
        .or_else(|| sources.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessType, AccessPolicy};

    fn raw(kind: Option<&str>, url: Option<&str>) -> RawSource {
        RawSource {
            kind: kind.map(String::from),
            url: url.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_explicit_kind_wins_over_suffix() {
        let source = raw(Some("iframe"), Some("https://cdn.example.com/video.mp4"));
        let url = Url::parse("https://cdn.example.com/video.mp4").unwrap();
        assert_eq!(
            infer_kind(source.kind.as_deref(), Some(&url)),
            SourceKind::Embed
        );
    }

    #[test]
    fn test_alias_folding() {
        assert_eq!(kind_from_explicit("M3U8"), Some(SourceKind::Hls));
        assert_eq!(kind_from_explicit("iframe"), Some(SourceKind::Embed));
        assert_eq!(kind_from_explicit("weird"), None);
    }

    #[test]
    fn test_suffix_inference() {
        let hls = Url::parse("https://cdn.example.com/master.m3u8").unwrap();
        let dash = Url::parse("https://cdn.example.com/manifest.mpd").unwrap();
        let mp4 = Url::parse("https://cdn.example.com/movie.mp4").unwrap();
        assert_eq!(infer_kind(None, Some(&hls)), SourceKind::Hls);
        assert_eq!(infer_kind(None, Some(&dash)), SourceKind::Dash);
        assert_eq!(infer_kind(None, Some(&mp4)), SourceKind::Mp4);
    }

    #[test]
    fn test_portal_host_and_default() {
        let portal = Url::parse("https://www.youtube.com/watch?v=abc").unwrap();
        assert_eq!(infer_kind(None, Some(&portal)), SourceKind::Embed);

        let unknown = Url::parse("https://cdn.example.com/stream").unwrap();
        assert_eq!(infer_kind(None, Some(&unknown)), SourceKind::Hls);
        assert_eq!(infer_kind(None, None), SourceKind::Hls);
    }

    #[test]
    fn test_free_content_keeps_urls() {
        let mut record = raw(Some("mp4"), Some("https://cdn.example.com/movie.mp4"));
        record.quality_urls = Some(HashMap::from([(
            "720p".to_string(),
            "https://cdn.example.com/720.mp4".to_string(),
        )]));

        let sources = normalize_sources(&[record], &AccessPolicy::free());
        assert!(sources[0].direct_url.is_some());
        assert!(sources[0].quality_urls.is_some());
    }

    #[test]
    fn test_gated_content_urls_stripped() {
        let mut record = raw(Some("mp4"), Some("https://cdn.example.com/movie.mp4"));
        record.quality_urls = Some(HashMap::from([(
            "720p".to_string(),
            "https://cdn.example.com/720.mp4".to_string(),
        )]));

        let policy = AccessPolicy {
            access_type: AccessType::Rent,
            exclude_from_plan: false,
        };
        let sources = normalize_sources(&[record], &policy);
        assert!(sources[0].direct_url.is_none());
        assert!(sources[0].quality_urls.is_none());
    }

    #[test]
    fn test_empty_quality_map_is_none() {
        let mut record = raw(Some("mp4"), Some("https://cdn.example.com/movie.mp4"));
        record.quality_urls = Some(HashMap::new());
        let sources = normalize_sources(&[record], &AccessPolicy::free());
        assert!(sources[0].quality_urls.is_none());
    }

    #[test]
    fn test_adaptive_kinds_drop_ladder() {
        let mut record = raw(Some("hls"), Some("https://cdn.example.com/master.m3u8"));
        record.quality_urls = Some(HashMap::from([(
            "720p".to_string(),
            "https://cdn.example.com/720.m3u8".to_string(),
        )]));
        let sources = normalize_sources(&[record], &AccessPolicy::free());
        assert!(sources[0].quality_urls.is_none());
        assert!(sources[0].direct_url.is_some());
    }

    #[test]
    fn test_pick_candidate_order() {
        let sources = normalize_sources(
            &[
                RawSource {
                    id: Some("a".into()),
                    ..Default::default()
                },
                RawSource {
                    id: Some("b".into()),
                    is_default: true,
                    ..Default::default()
                },
            ],
            &AccessPolicy::free(),
        );

        assert_eq!(pick_candidate(&sources, Some("a")).unwrap().id, "a");
        assert_eq!(pick_candidate(&sources, None).unwrap().id, "b");
        assert_eq!(pick_candidate(&sources, Some("missing")).unwrap().id, "b");
        assert!(pick_candidate(&[], None).is_none());
    }
}
