//! Playback Session Walkthrough
//!
//! Drives a full session lifecycle against in-memory collaborators:
//! select a free title, watch the state machine reach ready, change
//! quality, switch servers, and tear the session down.
//!
//! # Usage
//! ```bash
//! cargo run --example playback_walkthrough
//! ```

use anyhow::Result;
use async_trait::async_trait;
use cineflow_playback::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .init();

    println!("Cineflow Playback v{}", VERSION);
    println!("{}", "=".repeat(60));

    let sink = Arc::new(ConsoleSink::default());
    let manager = SessionManager::new(
        sink,
        Arc::new(DemoEngineFactory),
        Arc::new(NoResolver),
        Arc::new(EverythingFree),
        Arc::new(NoHistory),
        None,
        SessionConfig::default(),
    );
    manager.set_identity(Some("demo-user".into())).await;

    let mut states = manager.subscribe_state();

    println!("\n1. Selecting a free title with two servers...");
    let sources: Vec<RawSource> = serde_json::from_value(serde_json::json!([
        {
            "id": "hd",
            "server_name": "HD Server",
            "source_type": "hls",
            "url": "https://cdn.example.com/title/master.m3u8",
            "is_default": true,
        },
        {
            "id": "mp4",
            "name": "Progressive Server",
            "type": "mp4",
            "file": "https://cdn.example.com/title/movie.mp4",
            "qualities": {
                "1080p": "https://cdn.example.com/title/movie-1080.mp4",
                "720p": "https://cdn.example.com/title/movie-720.mp4",
            },
        }
    ]))?;
    manager
        .select_title(
            &sources,
            AccessPolicy::free(),
            MediaRef::Movie {
                movie_id: "demo-movie".into(),
            },
            None,
        )
        .await?;
    println!("   state: {}", *states.borrow_and_update());
    println!("   quality: {:?} (auto: {})", manager.current_quality().await, manager.auto_quality().await);
    println!("   available: {:?}", manager.available_qualities().await);

    println!("\n2. Manual quality override...");
    manager.set_quality("720p").await?;
    println!("   quality: {:?} (auto: {})", manager.current_quality().await, manager.auto_quality().await);

    println!("\n3. Switching to the progressive server...");
    manager.seek(95.0).await?;
    manager.play().await?;
    manager.switch_source("mp4").await?;
    println!("   state: {}", manager.state());
    println!("   position carried over: {:.1}s", manager.position_secs().await);

    println!("\n4. Tearing down...");
    manager.teardown().await?;
    println!("   state: {}", manager.state());

    println!("\n{}", "=".repeat(60));
    println!("Done.");
    Ok(())
}

// =============================================================================
// In-memory collaborators
// =============================================================================

#[derive(Default)]
struct ConsoleSink {
    url: Mutex<Option<Url>>,
    position: Mutex<f64>,
    playing: AtomicBool,
}

#[async_trait]
impl MediaSink for ConsoleSink {
    async fn assign_url(&self, url: &Url) -> cineflow_playback::Result<()> {
        println!("   [sink] src = {url}");
        *self.url.lock().unwrap() = Some(url.clone());
        Ok(())
    }
    async fn clear_source(&self) -> cineflow_playback::Result<()> {
        *self.url.lock().unwrap() = None;
        Ok(())
    }
    async fn await_can_play(&self) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn play(&self) -> cineflow_playback::Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn pause(&self) -> cineflow_playback::Result<()> {
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn seek(&self, position_secs: f64) -> cineflow_playback::Result<()> {
        *self.position.lock().unwrap() = position_secs;
        Ok(())
    }
    async fn set_volume(&self, _volume: f64) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn set_muted(&self, _muted: bool) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn set_playback_rate(&self, _rate: f64) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn position_secs(&self) -> f64 {
        *self.position.lock().unwrap()
    }
    async fn duration_secs(&self) -> Option<f64> {
        Some(5400.0)
    }
    async fn buffered_secs(&self) -> f64 {
        0.0
    }
    async fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

struct DemoEngine {
    variants: Vec<VariantInfo>,
    auto: AtomicBool,
    selected: Mutex<Option<String>>,
}

#[async_trait]
impl StreamingEngine for DemoEngine {
    async fn attach(&self, _sink: Arc<dyn MediaSink>) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn load(&self, manifest: &Url) -> cineflow_playback::Result<()> {
        println!("   [engine] loading {manifest}");
        Ok(())
    }
    async fn unload(&self) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn detach(&self) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn destroy(&self) -> cineflow_playback::Result<()> {
        println!("   [engine] destroyed");
        Ok(())
    }
    async fn variants(&self) -> Vec<VariantInfo> {
        self.variants.clone()
    }
    async fn set_auto_switching(&self, enabled: bool) -> cineflow_playback::Result<()> {
        self.auto.store(enabled, Ordering::SeqCst);
        Ok(())
    }
    async fn select_variant(&self, variant_id: &str) -> cineflow_playback::Result<()> {
        println!("   [engine] variant = {variant_id}");
        *self.selected.lock().unwrap() = Some(variant_id.to_string());
        Ok(())
    }
    async fn active_variant(&self) -> Option<VariantInfo> {
        let selected = self.selected.lock().unwrap().clone()?;
        self.variants.iter().find(|v| v.id == selected).cloned()
    }
    async fn seed_bandwidth_estimate(&self, bits_per_second: u64) -> cineflow_playback::Result<()> {
        println!("   [engine] bandwidth seed = {:.1} Mbps", bits_per_second as f64 / 1e6);
        Ok(())
    }
    async fn audio_tracks(&self) -> Vec<AudioTrackInfo> {
        Vec::new()
    }
    async fn select_audio(&self, _language: &str, _role: Option<&str>) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn active_audio(&self) -> Option<AudioTrackInfo> {
        None
    }
    async fn text_tracks(&self) -> Vec<TextTrackInfo> {
        Vec::new()
    }
    async fn select_text(&self, _language: &str, _role: Option<&str>) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn set_text_visible(&self, _visible: bool) -> cineflow_playback::Result<()> {
        Ok(())
    }
    async fn clear_text(&self) -> cineflow_playback::Result<()> {
        Ok(())
    }
}

struct DemoEngineFactory;

#[async_trait]
impl EngineFactory for DemoEngineFactory {
    async fn create(&self, kind: SourceKind) -> cineflow_playback::Result<Arc<dyn StreamingEngine>> {
        println!("   [engine] created for {kind}");
        Ok(Arc::new(DemoEngine {
            variants: [360u32, 480, 720, 1080]
                .iter()
                .map(|&h| VariantInfo {
                    id: format!("v{h}"),
                    height: h,
                    bandwidth: h as u64 * 5_000,
                })
                .collect(),
            auto: AtomicBool::new(false),
            selected: Mutex::new(None),
        }))
    }
}

/// Every title is free in this walkthrough, so the resolver must never run
struct NoResolver;

#[async_trait]
impl EntitlementResolver for NoResolver {
    async fn resolve(&self, request: ResolveRequest) -> cineflow_playback::Result<ResolveResponse> {
        Err(Error::ResolutionFailed(format!(
            "no resolver configured for source {}",
            request.source_id
        )))
    }
}

struct EverythingFree;

#[async_trait]
impl EntitlementFactsFeed for EverythingFree {
    async fn facts(&self, _media: &MediaRef) -> FactsState {
        FactsState::Loaded(EntitlementFacts {
            subscription_active: false,
            rental_active: false,
            can_stream: true,
        })
    }
}

struct NoHistory;

#[async_trait]
impl WatchHistoryStore for NoHistory {
    async fn find(&self, _user_id: &str, _media_id: &str) -> cineflow_playback::Result<Option<WatchRecord>> {
        Ok(None)
    }
    async fn upsert(&self, record: WatchRecord) -> cineflow_playback::Result<()> {
        println!(
            "   [history] saved {:.1}s / {:.1}s (completed: {})",
            record.progress, record.duration, record.completed
        );
        Ok(())
    }
}
