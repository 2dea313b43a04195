use std::future::Future;

use image::RgbaImage;
use live_detect_common::channel::Responder;
use live_detect_common::detection::DetectionResult;
use live_detect_common::protocol::Response;
use live_detect_common::CONFIDENCE_THRESHOLD;
use tracing::{debug, warn};

/// Options forwarded to the detector on every call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    pub threshold: f32,
    /// Report boxes as fractions of the frame instead of pixels.
    pub percentage: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            threshold: CONFIDENCE_THRESHOLD,
            percentage: true,
        }
    }
}

/// A constructed, ready-to-run object detector.
pub trait Detector: Send + Sync + 'static {
    fn detect(
        &self,
        image: &RgbaImage,
        options: DetectOptions,
    ) -> impl Future<Output = Result<Vec<DetectionResult>, DetectorError>> + Send;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Builds a [`Detector`]. Construction may be slow (downloads, weight
/// materialization) and reports progress as it goes.
pub trait DetectorLoader: Send + Sync + 'static {
    type Detector: Detector;

    fn load(
        &self,
        progress: ProgressSink,
    ) -> impl Future<Output = Result<Self::Detector, DetectorError>> + Send;
}

/// Forwards construction progress to the render loop as `loading` messages.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    responder: Responder,
}

impl ProgressSink {
    pub fn new(responder: Responder) -> Self {
        Self { responder }
    }

    /// Report progress in percent (0–100).
    pub fn report(&self, progress: f64) {
        debug!(progress, "detector construction progress");
        if self.responder.post(Response::progress(progress)).is_err() {
            warn!("progress dropped: render loop endpoint is gone");
        }
    }

    pub(crate) fn done(&self) {
        if self.responder.post(Response::done()).is_err() {
            warn!("construction done event dropped: render loop endpoint is gone");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detector construction failed: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("failed to spawn detector process: {0}")]
    Spawn(String),
    #[error("detector I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("detector protocol error: {0}")]
    Protocol(String),
    #[error("model download failed: {0}")]
    Download(String),
    #[error("detector panicked: {0}")]
    Panicked(String),
}
