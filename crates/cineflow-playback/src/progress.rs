//! Watch-progress recording and resume
//!
//! Persists position/duration to the external watch-history collaborator
//! on a fixed interval while a session is ready, performs one final save
//! on teardown (the interval is cleared first, so the tick and the final
//! save can never double-fire), and replays a saved position exactly once
//! on the next attach.

use crate::engine::MediaSink;
use crate::types::MediaRef;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One watch-history record, keyed by (user, episode | movie)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRecord {
    pub user_id: String,
    pub media_id: String,
    pub progress: f64,
    pub duration: f64,
    pub completed: bool,
    pub last_watched_at: DateTime<Utc>,
}

/// External watch-history store with upsert semantics
#[async_trait]
pub trait WatchHistoryStore: Send + Sync {
    async fn find(&self, user_id: &str, media_id: &str) -> Result<Option<WatchRecord>>;
    async fn upsert(&self, record: WatchRecord) -> Result<()>;
}

struct ActiveRecording {
    user_id: String,
    media_id: String,
    sink: Arc<dyn MediaSink>,
    task: JoinHandle<()>,
}

/// Periodic progress recorder bound to one session at a time
pub struct ProgressRecorder {
    store: Arc<dyn WatchHistoryStore>,
    save_interval: Duration,
    resume_min_secs: f64,
    completed_remaining_secs: f64,
    active: Mutex<Option<ActiveRecording>>,
    pending_resume: Mutex<Option<f64>>,
}

impl ProgressRecorder {
    pub fn new(
        store: Arc<dyn WatchHistoryStore>,
        save_interval: Duration,
        resume_min_secs: f64,
        completed_remaining_secs: f64,
    ) -> Self {
        Self {
            store,
            save_interval,
            resume_min_secs,
            completed_remaining_secs,
            active: Mutex::new(None),
            pending_resume: Mutex::new(None),
        }
    }

    /// Begin recording for one (user, media) pair. Looks up any prior
    /// record first and stages its position for a one-shot resume when it
    /// exceeds the threshold and is not flagged completed.
    pub async fn start(
        &self,
        user_id: &str,
        media: &MediaRef,
        sink: Arc<dyn MediaSink>,
    ) -> Result<()> {
        self.stop().await;

        let media_id = media.history_id().to_string();

        match self.store.find(user_id, &media_id).await {
            Ok(Some(record)) if !record.completed && record.progress > self.resume_min_secs => {
                debug!(position = record.progress, "Resume position staged");
                *self.pending_resume.lock().await = Some(record.progress);
            }
            Ok(_) => {
                *self.pending_resume.lock().await = None;
            }
            Err(e) => {
                // Resume is best-effort; never blocks playback
                warn!(error = %e, "Watch-history lookup failed");
                *self.pending_resume.lock().await = None;
            }
        }

        let task = {
            let store = Arc::clone(&self.store);
            let sink = Arc::clone(&sink);
            let user = user_id.to_string();
            let media_id = media_id.clone();
            let every = self.save_interval;
            let completed_remaining = self.completed_remaining_secs;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // The first tick fires immediately; skip it so a fresh
                // session does not save a zero position over a resume point
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) =
                        save_once(&*store, &user, &media_id, &*sink, completed_remaining).await
                    {
                        warn!(error = %e, "Progress save failed");
                    }
                }
            })
        };

        *self.active.lock().await = Some(ActiveRecording {
            user_id: user_id.to_string(),
            media_id,
            sink,
            task,
        });
        Ok(())
    }

    /// Take the staged resume position; one-shot, never reapplied
    pub async fn take_resume(&self) -> Option<f64> {
        self.pending_resume.lock().await.take()
    }

    /// Clear the interval without a final save (new title selected)
    pub async fn stop(&self) {
        if let Some(active) = self.active.lock().await.take() {
            active.task.abort();
        }
    }

    /// Teardown path: clear the interval first, then one last save
    pub async fn finish(&self) {
        let active = self.active.lock().await.take();
        if let Some(active) = active {
            active.task.abort();
            if let Err(e) = save_once(
                &*self.store,
                &active.user_id,
                &active.media_id,
                &*active.sink,
                self.completed_remaining_secs,
            )
            .await
            {
                warn!(error = %e, "Final progress save failed");
            }
        }
    }
}

async fn save_once(
    store: &dyn WatchHistoryStore,
    user_id: &str,
    media_id: &str,
    sink: &dyn MediaSink,
    completed_remaining_secs: f64,
) -> Result<()> {
    let position = sink.position_secs().await;
    let duration = match sink.duration_secs().await {
        Some(duration) if duration > 0.0 => duration,
        _ => return Ok(()),
    };

    let completed = duration - position < completed_remaining_secs;
    store
        .upsert(WatchRecord {
            user_id: user_id.to_string(),
            media_id: media_id.to_string(),
            progress: position,
            duration,
            completed,
            last_watched_at: Utc::now(),
        })
        .await?;

    debug!(position, duration, completed, "Progress saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use url::Url;

    #[derive(Default)]
    struct MemoryStore {
        records: StdMutex<HashMap<(String, String), WatchRecord>>,
    }

    #[async_trait]
    impl WatchHistoryStore for MemoryStore {
        async fn find(&self, user_id: &str, media_id: &str) -> Result<Option<WatchRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(&(user_id.to_string(), media_id.to_string()))
                .cloned())
        }

        async fn upsert(&self, record: WatchRecord) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert((record.user_id.clone(), record.media_id.clone()), record);
            Ok(())
        }
    }

    struct StubSink {
        position: StdMutex<f64>,
        duration: Option<f64>,
    }

    #[async_trait]
    impl MediaSink for StubSink {
        async fn assign_url(&self, _url: &Url) -> Result<()> {
            Ok(())
        }
        async fn clear_source(&self) -> Result<()> {
            Ok(())
        }
        async fn await_can_play(&self) -> Result<()> {
            Ok(())
        }
        async fn play(&self) -> Result<()> {
            Ok(())
        }
        async fn pause(&self) -> Result<()> {
            Ok(())
        }
        async fn seek(&self, position_secs: f64) -> Result<()> {
            *self.position.lock().unwrap() = position_secs;
            Ok(())
        }
        async fn set_volume(&self, _volume: f64) -> Result<()> {
            Ok(())
        }
        async fn set_muted(&self, _muted: bool) -> Result<()> {
            Ok(())
        }
        async fn set_playback_rate(&self, _rate: f64) -> Result<()> {
            Ok(())
        }
        async fn position_secs(&self) -> f64 {
            *self.position.lock().unwrap()
        }
        async fn duration_secs(&self) -> Option<f64> {
            self.duration
        }
        async fn buffered_secs(&self) -> f64 {
            0.0
        }
        async fn is_playing(&self) -> bool {
            false
        }
    }

    fn movie() -> MediaRef {
        MediaRef::Movie {
            movie_id: "m1".into(),
        }
    }

    fn recorder(store: Arc<MemoryStore>) -> ProgressRecorder {
        ProgressRecorder::new(store, Duration::from_secs(10), 10.0, 30.0)
    }

    #[tokio::test]
    async fn test_final_save_on_finish() {
        let store = Arc::new(MemoryStore::default());
        let recorder = recorder(store.clone());
        let sink = Arc::new(StubSink {
            position: StdMutex::new(125.0),
            duration: Some(3600.0),
        });

        recorder.start("u1", &movie(), sink).await.unwrap();
        recorder.finish().await;

        let record = store.find("u1", "m1").await.unwrap().unwrap();
        assert_eq!(record.progress, 125.0);
        assert_eq!(record.duration, 3600.0);
        assert!(!record.completed);
    }

    #[tokio::test]
    async fn test_completed_when_remaining_under_threshold() {
        let store = Arc::new(MemoryStore::default());
        let recorder = recorder(store.clone());
        let sink = Arc::new(StubSink {
            position: StdMutex::new(3580.0),
            duration: Some(3600.0),
        });

        recorder.start("u1", &movie(), sink).await.unwrap();
        recorder.finish().await;

        assert!(store.find("u1", "m1").await.unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn test_resume_is_one_shot() {
        let store = Arc::new(MemoryStore::default());
        store
            .upsert(WatchRecord {
                user_id: "u1".into(),
                media_id: "m1".into(),
                progress: 300.0,
                duration: 3600.0,
                completed: false,
                last_watched_at: Utc::now(),
            })
            .await
            .unwrap();

        let recorder = recorder(store);
        let sink = Arc::new(StubSink {
            position: StdMutex::new(0.0),
            duration: Some(3600.0),
        });
        recorder.start("u1", &movie(), sink).await.unwrap();

        assert_eq!(recorder.take_resume().await, Some(300.0));
        assert_eq!(recorder.take_resume().await, None);
        recorder.stop().await;
    }

    #[tokio::test]
    async fn test_no_resume_below_threshold_or_completed() {
        let store = Arc::new(MemoryStore::default());
        store
            .upsert(WatchRecord {
                user_id: "u1".into(),
                media_id: "m1".into(),
                progress: 5.0,
                duration: 3600.0,
                completed: false,
                last_watched_at: Utc::now(),
            })
            .await
            .unwrap();

        let recorder = recorder(store.clone());
        let sink = Arc::new(StubSink {
            position: StdMutex::new(0.0),
            duration: Some(3600.0),
        });
        recorder.start("u1", &movie(), sink.clone()).await.unwrap();
        assert_eq!(recorder.take_resume().await, None);

        store
            .upsert(WatchRecord {
                user_id: "u1".into(),
                media_id: "m1".into(),
                progress: 3590.0,
                duration: 3600.0,
                completed: true,
                last_watched_at: Utc::now(),
            })
            .await
            .unwrap();
        recorder.start("u1", &movie(), sink).await.unwrap();
        assert_eq!(recorder.take_resume().await, None);
        recorder.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_duration_skips_save() {
        let store = Arc::new(MemoryStore::default());
        let recorder = recorder(store.clone());
        let sink = Arc::new(StubSink {
            position: StdMutex::new(50.0),
            duration: None,
        });

        recorder.start("u1", &movie(), sink).await.unwrap();
        recorder.finish().await;
        assert!(store.find("u1", "m1").await.unwrap().is_none());
    }

    struct FailingStore;

    #[async_trait]
    impl WatchHistoryStore for FailingStore {
        async fn find(&self, _user_id: &str, _media_id: &str) -> Result<Option<WatchRecord>> {
            Err(crate::Error::WatchHistory("backend down".into()))
        }

        async fn upsert(&self, _record: WatchRecord) -> Result<()> {
            Err(crate::Error::WatchHistory("backend down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failures_never_block_recording() {
        let recorder = ProgressRecorder::new(
            Arc::new(FailingStore),
            Duration::from_secs(10),
            10.0,
            30.0,
        );
        let sink = Arc::new(StubSink {
            position: StdMutex::new(125.0),
            duration: Some(3600.0),
        });

        // Lookup failure degrades to no resume; the recorder still starts
        recorder.start("u1", &movie(), sink).await.unwrap();
        assert_eq!(recorder.take_resume().await, None);

        // Final save failure is swallowed with a warning
        recorder.finish().await;
    }
}
