//! Live video sources.
//!
//! A feed task publishes the newest decoded frame into a `watch` channel;
//! the render loop reads it for presentation and copies it out when it
//! needs an owned frame for inference.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use live_detect_common::frame::FrameBuffer;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub type SharedFrame = Option<Arc<RgbaImage>>;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no frame available from the video source yet")]
    NoSignal,
    #[error("frame copy task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub trait FrameSource: Send {
    /// The current frame for presentation. Never blocks.
    fn preview(&self) -> SharedFrame;

    /// An owned copy of the current frame, stamped with `seq`.
    fn capture(&mut self, seq: u64) -> impl Future<Output = Result<FrameBuffer, CaptureError>> + Send;
}

/// Reader side of a feed task.
pub struct LiveFeed {
    rx: watch::Receiver<SharedFrame>,
}

pub fn live_feed() -> (watch::Sender<SharedFrame>, LiveFeed) {
    let (tx, rx) = watch::channel(None);
    (tx, LiveFeed { rx })
}

impl FrameSource for LiveFeed {
    fn preview(&self) -> SharedFrame {
        self.rx.borrow().clone()
    }

    async fn capture(&mut self, seq: u64) -> Result<FrameBuffer, CaptureError> {
        let latest = self.preview().ok_or(CaptureError::NoSignal)?;
        let pixels = tokio::task::spawn_blocking(move || latest.as_ref().clone()).await?;
        Ok(FrameBuffer::captured_now(pixels, seq))
    }
}

#[derive(Debug, thiserror::Error)]
enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decode task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Poll `url` for still images at `fps` and publish each decoded frame.
/// Fetch and decode failures are logged and retried on the next tick. The
/// task ends when every reader is gone.
pub fn spawn_http_feed(tx: watch::Sender<SharedFrame>, url: String, fps: f64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to build HTTP client, feed stopped");
                return;
            }
        };
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(url, fps, "polling camera snapshots");

        let mut frames: u64 = 0;
        loop {
            ticker.tick().await;
            match fetch_frame(&client, &url).await {
                Ok(img) => {
                    if tx.send(Some(Arc::new(img))).is_err() {
                        debug!("no readers left, stopping HTTP feed");
                        break;
                    }
                    frames += 1;
                }
                Err(e) => warn!(error = %e, frames, "failed to fetch camera frame"),
            }
        }
    })
}

async fn fetch_frame(client: &reqwest::Client, url: &str) -> Result<RgbaImage, FeedError> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(FeedError::Status(resp.status().as_u16()));
    }
    let body = resp.bytes().await?;
    let img = tokio::task::spawn_blocking(move || image::load_from_memory(&body)).await??;
    Ok(img.to_rgba8())
}

/// Publish a synthetic moving test pattern at `fps`.
pub fn spawn_pattern_feed(
    tx: watch::Sender<SharedFrame>,
    width: u32,
    height: u32,
    fps: f64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(width, height, fps, "generating test pattern");

        let mut n: u64 = 0;
        loop {
            ticker.tick().await;
            if tx.send(Some(Arc::new(pattern_frame(width, height, n)))).is_err() {
                debug!("no readers left, stopping pattern feed");
                break;
            }
            n += 1;
        }
    })
}

/// Diagonal gradient with a white square sweeping left to right.
fn pattern_frame(width: u32, height: u32, n: u64) -> RgbaImage {
    let side = (width.min(height) / 4).max(1);
    let travel = width.saturating_sub(side).max(1) as u64;
    let sq_x = ((n * 4) % travel) as u32;
    let sq_y = (height - side.min(height)) / 2;

    RgbaImage::from_fn(width, height, |x, y| {
        if x >= sq_x && x < sq_x + side && y >= sq_y && y < sq_y + side {
            return Rgba([255, 255, 255, 255]);
        }
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgba([r, g, 96, 255])
    })
}
