//! Export preview and size/time estimation.
//!
//! Each settings change asks the backend for one rendered frame plus an
//! estimate for the whole export. Estimates are cached per settings tuple
//! for the lifetime of the estimator; the cache is filled once per key and
//! never overwritten, so the first estimate for a tuple is the one shown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use cap_common::config::PreviewConfig;
use cap_common::error::{ExportError, ExportResult};
use cap_common::sync::{lock, Debouncer};
use cap_export_model::settings::ExportSettings;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::backend::{AssetId, AssetStore, PreviewBackend, PreviewResponse, PreviewSettings, XY};

/// Inputs for one preview fetch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewRequest {
    /// Playhead position in seconds.
    pub frame_time: f64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub bpp: f64,
}

impl PreviewRequest {
    pub fn from_settings(frame_time: f64, settings: &ExportSettings) -> Self {
        Self {
            frame_time,
            fps: settings.fps,
            width: settings.width(),
            height: settings.height(),
            bpp: settings.effective_bpp(),
        }
    }

    pub fn key(&self) -> EstimateKey {
        EstimateKey {
            fps: self.fps,
            width: self.width,
            height: self.height,
            bpp_bits: self.bpp.to_bits(),
        }
    }

    fn backend_settings(&self) -> PreviewSettings {
        PreviewSettings {
            fps: self.fps,
            resolution_base: XY {
                x: self.width,
                y: self.height,
            },
            compression_bpp: self.bpp,
        }
    }
}

/// Cache key: `(fps, width, height, bpp)` with bpp compared bit-for-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EstimateKey {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    bpp_bits: u64,
}

impl EstimateKey {
    pub fn bpp(&self) -> f64 {
        f64::from_bits(self.bpp_bits)
    }
}

/// Estimated cost of a full export.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEstimate {
    pub frame_render_time_ms: f64,
    pub total_frames: u64,
    pub estimated_size_mb: f64,
}

impl RenderEstimate {
    /// Length of the exported video at `fps`.
    pub fn duration_secs(&self, fps: u32) -> f64 {
        if fps == 0 {
            return 0.0;
        }
        self.total_frames as f64 / fps as f64
    }

    /// Wall time the render is expected to take.
    pub fn render_time_secs(&self) -> f64 {
        self.frame_render_time_ms * self.total_frames as f64 / 1000.0
    }
}

impl From<&PreviewResponse> for RenderEstimate {
    fn from(response: &PreviewResponse) -> Self {
        Self {
            frame_render_time_ms: response.frame_render_time_ms,
            total_frames: response.total_frames,
            estimated_size_mb: response.estimated_size_mb,
        }
    }
}

/// A successfully applied preview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preview {
    pub asset: AssetId,
    pub estimate: RenderEstimate,
}

/// What the UI should currently show.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PreviewSnapshot {
    pub asset: Option<AssetId>,
    pub estimate: Option<RenderEstimate>,
    pub loading: bool,
}

#[derive(Debug, Default)]
struct PreviewCache {
    estimates: HashMap<EstimateKey, RenderEstimate>,
    current_asset: Option<AssetId>,
    /// Sequence number of the newest request whose image is displayed.
    applied_seq: u64,
}

/// Fetches previews, owns the displayed image, and caches estimates.
pub struct PreviewEstimator {
    backend: Arc<dyn PreviewBackend>,
    assets: Arc<dyn AssetStore>,
    config: PreviewConfig,
    cache: Mutex<PreviewCache>,
    snapshot: watch::Sender<PreviewSnapshot>,
    debouncer: Debouncer,
    next_seq: AtomicU64,
}

impl PreviewEstimator {
    pub fn new(
        backend: Arc<dyn PreviewBackend>,
        assets: Arc<dyn AssetStore>,
        config: PreviewConfig,
    ) -> Arc<Self> {
        let (snapshot, _) = watch::channel(PreviewSnapshot::default());
        Arc::new(Self {
            backend,
            assets,
            debouncer: Debouncer::new(config.debounce()),
            config,
            cache: Mutex::new(PreviewCache::default()),
            snapshot,
            next_seq: AtomicU64::new(0),
        })
    }

    pub fn snapshot(&self) -> PreviewSnapshot {
        *self.snapshot.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreviewSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn cached_estimate(&self, key: &EstimateKey) -> Option<RenderEstimate> {
        lock(&self.cache).estimates.get(key).copied()
    }

    pub fn cached_estimates(&self) -> usize {
        lock(&self.cache).estimates.len()
    }

    /// Fetch immediately, e.g. once when the export view opens.
    pub async fn refresh_now(&self, request: PreviewRequest) -> Option<Preview> {
        self.set_loading(true);
        self.fetch_preview(request).await
    }

    /// Fetch after the debounce window, superseding any pending refresh.
    pub fn schedule_refresh(self: &Arc<Self>, request: PreviewRequest) {
        self.set_loading(true);
        let this = Arc::clone(self);
        self.debouncer.call(async move {
            this.fetch_preview(request).await;
        });
    }

    /// Fetch one preview with retries.
    ///
    /// A cached estimate for the same key is published before the request
    /// goes out. Failures are retried with linear backoff and then dropped;
    /// they are logged, never returned.
    pub async fn fetch_preview(&self, request: PreviewRequest) -> Option<Preview> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let key = request.key();

        if let Some(cached) = self.cached_estimate(&key) {
            self.snapshot.send_modify(|snapshot| snapshot.estimate = Some(cached));
        }

        let mut attempt = 0u32;
        let fetched = loop {
            match self.request_once(&request).await {
                Ok(fetched) => break Some(fetched),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        fps = request.fps,
                        width = request.width,
                        height = request.height,
                        "Failed to generate preview"
                    );
                    if attempt >= self.config.max_retries {
                        break None;
                    }
                    attempt += 1;
                    tokio::time::sleep(self.config.backoff_for(attempt)).await;
                }
            }
        };

        let preview = fetched.and_then(|(jpeg, estimate)| self.apply(seq, key, jpeg, estimate));
        // A newer fetch still owns the spinner.
        if seq == self.next_seq.load(Ordering::SeqCst) {
            self.set_loading(false);
        }
        preview
    }

    /// Cancel any pending debounced refresh and release the current image.
    pub fn shutdown(&self) {
        self.debouncer.cancel();
        let released = lock(&self.cache).current_asset.take();
        if let Some(asset) = released {
            self.assets.release(asset);
        }
        self.snapshot.send_modify(|snapshot| {
            snapshot.asset = None;
            snapshot.loading = false;
        });
    }

    async fn request_once(
        &self,
        request: &PreviewRequest,
    ) -> ExportResult<(Vec<u8>, RenderEstimate)> {
        let response = self
            .backend
            .generate_export_preview_fast(request.frame_time, &request.backend_settings())
            .await?;
        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(response.jpeg_base64.as_bytes())
            .map_err(|e| ExportError::preview(format!("Invalid preview image payload: {e}")))?;
        Ok((jpeg, RenderEstimate::from(&response)))
    }

    fn apply(
        &self,
        seq: u64,
        key: EstimateKey,
        jpeg: Vec<u8>,
        fresh: RenderEstimate,
    ) -> Option<Preview> {
        let mut cache = lock(&self.cache);
        let estimate = *cache.estimates.entry(key).or_insert(fresh);

        if seq < cache.applied_seq {
            tracing::debug!(seq, applied = cache.applied_seq, "Discarding stale preview");
            return None;
        }

        let asset = self.assets.create(jpeg);
        if let Some(previous) = cache.current_asset.replace(asset) {
            self.assets.release(previous);
        }
        cache.applied_seq = seq;

        self.snapshot.send_modify(|snapshot| {
            snapshot.asset = Some(asset);
            snapshot.estimate = Some(estimate);
        });
        tracing::debug!(
            fps = key.fps,
            width = key.width,
            height = key.height,
            bpp = key.bpp(),
            estimated_size_mb = estimate.estimated_size_mb,
            "Preview updated"
        );

        Some(Preview { asset, estimate })
    }

    fn set_loading(&self, loading: bool) {
        self.snapshot.send_modify(|snapshot| snapshot.loading = loading);
    }
}

impl Drop for PreviewEstimator {
    fn drop(&mut self) {
        let cache = self.cache.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(asset) = cache.current_asset.take() {
            self.assets.release(asset);
        }
    }
}
