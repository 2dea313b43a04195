use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::detector::{Detector, DetectorError, DetectorLoader, ProgressSink};

/// Detector lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Loading,
            _ => LifecycleState::Ready,
        }
    }
}

/// A detector that is built on first use and then kept for the life of the
/// process.
///
/// Construction is memoized: concurrent callers during `Loading` wait on the
/// same construction. A failed construction leaves nothing cached, so the
/// next caller retries; the state stays `Loading` rather than regressing.
pub struct LazyDetector<L: DetectorLoader> {
    loader: L,
    cell: OnceCell<L::Detector>,
    state: AtomicU8,
    attempts: AtomicU32,
}

impl<L: DetectorLoader> LazyDetector<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of construction attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Return the detector, constructing it first if needed.
    ///
    /// Emits one `loading/done` through `progress` when, and only when, a
    /// construction succeeds.
    pub async fn get(&self, progress: ProgressSink) -> Result<&L::Detector, DetectorError> {
        if let Some(detector) = self.cell.get() {
            return Ok(detector);
        }
        let progress = &progress;
        self.cell
            .get_or_try_init(|| async move {
                self.advance(LifecycleState::Loading);
                let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                info!(attempt, "detector construction started");
                match self.loader.load(progress.clone()).await {
                    Ok(detector) => {
                        self.advance(LifecycleState::Ready);
                        progress.done();
                        info!(attempt, detector = detector.name(), "detector ready");
                        Ok(detector)
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "detector construction failed, will retry on next request");
                        Err(e)
                    }
                }
            })
            .await
    }

    fn advance(&self, to: LifecycleState) {
        self.state.fetch_max(to as u8, Ordering::AcqRel);
    }
}
