//! Bandwidth estimation
//!
//! Maintains a single current throughput estimate, refreshed on a fixed
//! interval and on demand. Preferred input is a runtime-reported downlink
//! hint; the fallback is a timed probe download. Estimator failures are
//! never fatal and never block playback start.

use crate::types::{BandwidthSample, SessionConfig};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Runtime-reported network quality hint, when the platform exposes one
#[async_trait]
pub trait ThroughputHint: Send + Sync {
    /// Current downlink estimate in bits per second, if known
    async fn downlink_bps(&self) -> Option<u64>;
}

/// Periodic bandwidth estimator
pub struct BandwidthEstimator {
    hint: Option<Arc<dyn ThroughputHint>>,
    client: Client,
    probe_url: Option<Url>,
    default_bps: u64,
    sample_tx: watch::Sender<BandwidthSample>,
}

impl BandwidthEstimator {
    pub fn new(config: &SessionConfig, hint: Option<Arc<dyn ThroughputHint>>) -> Self {
        let (sample_tx, _) = watch::channel(BandwidthSample::new(config.default_bandwidth_bps));

        let client = Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .unwrap_or_default();

        Self {
            hint,
            client,
            probe_url: config.probe_url.clone(),
            default_bps: config.default_bandwidth_bps,
            sample_tx,
        }
    }

    /// Most recent estimate (last good sample, or the default)
    pub fn current(&self) -> BandwidthSample {
        *self.sample_tx.borrow()
    }

    /// Subscribe to estimate updates
    pub fn subscribe(&self) -> watch::Receiver<BandwidthSample> {
        self.sample_tx.subscribe()
    }

    /// Refresh the estimate once: hint first, probe fallback, keep the
    /// last good sample on failure
    pub async fn refresh(&self) {
        if let Some(ref hint) = self.hint {
            if let Some(bps) = hint.downlink_bps().await {
                debug!(mbps = bps as f64 / 1_000_000.0, "Bandwidth hint");
                // send_replace: the sample must land even when no
                // receiver is subscribed
                self.sample_tx.send_replace(BandwidthSample::new(bps));
                return;
            }
        }

        match self.probe().await {
            Ok(bps) => {
                debug!(mbps = bps as f64 / 1_000_000.0, "Bandwidth probe");
                self.sample_tx.send_replace(BandwidthSample::new(bps));
            }
            Err(e) => {
                // Non-fatal: retain the last good estimate
                warn!(error = %e, "Bandwidth probe failed, keeping last estimate");
            }
        }
    }

    /// Download the reference payload and convert bytes/elapsed to bps
    async fn probe(&self) -> Result<u64> {
        let url = match self.probe_url {
            Some(ref url) => url.clone(),
            None => return Ok(self.default_bps),
        };

        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let data = response.bytes().await?;
        let elapsed = start.elapsed().as_secs_f64();

        if elapsed > 0.0 && !data.is_empty() {
            Ok(((data.len() as f64 * 8.0) / elapsed) as u64)
        } else {
            Ok(self.default_bps)
        }
    }

    /// Spawn the periodic refresh task. The returned handle belongs to the
    /// session's disposal list and must be aborted on teardown.
    pub fn spawn_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let estimator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                estimator.refresh().await;
            }
        })
    }
}
