//! Types shared by the render loop and the inference task: frames, detection
//! results, the message envelope and the channel that carries it, and config.

pub mod channel;
pub mod config;
pub mod detection;
pub mod frame;
pub mod protocol;

/// Fixed confidence cutoff applied to every inference run.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;
