use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;
use image::RgbaImage;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("failed to write snapshot {0}: {1}")]
    Snapshot(String, image::ImageError),
    #[error("snapshot writer failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}

/// Where composed frames go.
pub trait Display {
    fn present(&mut self, frame: &RgbaImage) -> Result<(), DisplayError>;
}

/// Headless display: overwrites a PNG with every `every`-th composed frame.
///
/// Encoding runs on the blocking pool so `present` never stalls the render
/// loop. While a write is still running, due snapshots are skipped rather
/// than queued, and a failed write is reported by the next `present`.
pub struct SnapshotDisplay {
    path: Arc<PathBuf>,
    every: u64,
    presented: u64,
    writing: Option<JoinHandle<Result<(), DisplayError>>>,
}

impl SnapshotDisplay {
    pub fn new(path: PathBuf, every: u64) -> Self {
        Self {
            path: Arc::new(path),
            every: every.max(1),
            presented: 0,
            writing: None,
        }
    }

    /// Outcome of the previous write if it has finished. Leaves a running
    /// write in place.
    fn reap(&mut self) -> Result<(), DisplayError> {
        let Some(handle) = self.writing.take() else {
            return Ok(());
        };
        if !handle.is_finished() {
            self.writing = Some(handle);
            return Ok(());
        }
        match handle.now_or_never() {
            Some(joined) => joined?,
            None => Ok(()),
        }
    }

    #[cfg(test)]
    async fn settle(&mut self) -> Result<(), DisplayError> {
        match self.writing.take() {
            Some(handle) => handle.await?,
            None => Ok(()),
        }
    }
}

impl Display for SnapshotDisplay {
    fn present(&mut self, frame: &RgbaImage) -> Result<(), DisplayError> {
        let previous = self.reap();

        let n = self.presented;
        self.presented += 1;
        if n % self.every == 0 {
            if self.writing.is_some() {
                debug!(frame = n, "previous snapshot still being written, skipped");
            } else {
                let frame = frame.clone();
                let path = Arc::clone(&self.path);
                let write = move || -> Result<(), DisplayError> {
                    frame
                        .save_with_format(path.as_path(), image::ImageFormat::Png)
                        .map_err(|e| DisplayError::Snapshot(path.display().to_string(), e))?;
                    debug!(frame = n, path = path.display().to_string(), "snapshot written");
                    Ok(())
                };
                self.writing = Some(tokio::task::spawn_blocking(write));
            }
        }
        previous
    }
}
