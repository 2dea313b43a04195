//! The inference side of the live detection pipeline.
//!
//! [`InferenceTask`] owns a [`LazyDetector`] and serves `predict` requests
//! from a [`TaskEndpoint`](live_detect_common::channel::TaskEndpoint), one at a
//! time, replying with exactly one `complete` or `error` per request.

pub mod detector;
pub mod lazy;
pub mod process;
pub mod task;

pub use detector::{DetectOptions, Detector, DetectorError, DetectorLoader, ProgressSink};
pub use lazy::{LazyDetector, LifecycleState};
pub use process::{ProcessDetector, ProcessDetectorLoader};
pub use task::{join_with_grace, InferenceTask, TaskSummary};
