//! The render/capture loop.
//!
//! Every tick presents the current frame with the last received detections,
//! then offers one new frame to the inference task if nothing is in flight.
//! The loop never waits on inference: while the gate is held, newer frames
//! are dropped, not queued.

use std::future::Future;
use std::time::Duration;

use live_detect_common::channel::{ChannelClosed, LoopEndpoint};
use live_detect_common::config::RenderConfig;
use live_detect_common::detection::DetectionSet;
use live_detect_common::protocol::{Request, Response};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::display::Display;
use crate::gate::InFlightGate;
use crate::overlay;
use crate::source::FrameSource;
use crate::status::{Status, StatusLine};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub dispatched: u64,
    /// Ticks that found the gate held and dropped their frame.
    pub skipped: u64,
    pub capture_failures: u64,
    pub completed: u64,
    pub errors: u64,
    /// Responses that did not answer the outstanding request.
    pub stale: u64,
    /// Requests given up on by the watchdog.
    pub abandoned: u64,
}

pub struct RenderLoop<S: FrameSource, D: Display> {
    source: S,
    display: D,
    endpoint: LoopEndpoint,
    gate: InFlightGate,
    detections: DetectionSet,
    status: StatusLine,
    inference_timeout: Option<Duration>,
    frame_interval: Duration,
    next_seq: u64,
    stats: LoopStats,
}

impl<S: FrameSource, D: Display> RenderLoop<S, D> {
    pub fn new(source: S, display: D, endpoint: LoopEndpoint, config: &RenderConfig) -> Self {
        Self {
            source,
            display,
            endpoint,
            gate: InFlightGate::default(),
            detections: DetectionSet::default(),
            status: StatusLine::default(),
            inference_timeout: config.inference_timeout(),
            frame_interval: Duration::from_secs_f64(1.0 / config.fps),
            next_seq: 0,
            stats: LoopStats::default(),
        }
    }

    pub fn gate(&self) -> &InFlightGate {
        &self.gate
    }

    /// The most recently received detections.
    pub fn detections(&self) -> &DetectionSet {
        &self.detections
    }

    pub fn status(&self) -> &Status {
        self.status.current()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// One loop iteration: present, offer a frame, then apply whatever the
    /// task has sent meanwhile. Fails only when the inference task is gone.
    pub async fn tick(&mut self) -> Result<(), ChannelClosed> {
        self.stats.ticks += 1;
        self.present();
        self.check_watchdog();
        self.dispatch().await?;
        self.drain_responses()
    }

    fn drain_responses(&mut self) -> Result<(), ChannelClosed> {
        while let Some(response) = self.endpoint.try_recv()? {
            self.on_response(response);
        }
        Ok(())
    }

    fn present(&mut self) {
        let Some(frame) = self.source.preview() else {
            return;
        };
        let composed = overlay::render(&frame, &self.detections);
        if let Err(e) = self.display.present(&composed) {
            warn!(error = %e, "failed to present frame");
        }
    }

    fn check_watchdog(&mut self) {
        let Some(timeout) = self.inference_timeout else {
            return;
        };
        if let Some(seq) = self.gate.expire(timeout) {
            self.stats.abandoned += 1;
            warn!(
                seq,
                timeout_secs = timeout.as_secs_f64(),
                "inference did not answer in time, releasing gate"
            );
        }
    }

    async fn dispatch(&mut self) -> Result<(), ChannelClosed> {
        let seq = self.next_seq;
        if !self.gate.acquire(seq) {
            self.stats.skipped += 1;
            debug!(outstanding = ?self.gate.outstanding(), "inference in flight, frame dropped");
            return Ok(());
        }
        self.next_seq += 1;

        let frame = match self.source.capture(seq).await {
            Ok(frame) => frame,
            Err(e) => {
                self.gate.release(Some(seq));
                self.stats.capture_failures += 1;
                warn!(seq, error = %e, "frame capture failed");
                return Ok(());
            }
        };

        if let Err(e) = self.endpoint.post(Request::Predict(frame)) {
            self.gate.release(Some(seq));
            error!(seq, error = %e, "failed to dispatch frame");
            return Err(e);
        }
        self.stats.dispatched += 1;
        debug!(seq, "frame dispatched");
        Ok(())
    }

    /// Apply one message from the inference task.
    pub fn on_response(&mut self, response: Response) {
        self.status.update(Status::from_response(&response));
        if !response.is_terminal() {
            // Construction progress means the outstanding request is alive.
            self.gate.touch();
            return;
        }

        let answers = response.answers();
        if !self.gate.release(answers) {
            self.stats.stale += 1;
            debug!(
                answers = ?answers,
                outstanding = ?self.gate.outstanding(),
                "response does not match the outstanding request"
            );
        }

        match response {
            Response::Complete { output, seq } => {
                self.stats.completed += 1;
                debug!(seq = ?seq, detections = output.len(), "detections updated");
                self.detections = output;
            }
            Response::Error { data, seq } => {
                // Keep showing the last good overlay.
                self.stats.errors += 1;
                warn!(seq = ?seq, error = %data, "inference task reported an error");
            }
            Response::Loading { .. } => {}
        }
    }

    /// Drive the loop at the configured rate until `shutdown` resolves or
    /// the inference task goes away.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> LoopStats {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            interval_ms = self.frame_interval.as_secs_f64() * 1000.0,
            timeout_secs = self.inference_timeout.map(|t| t.as_secs()),
            "render loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                msg = self.endpoint.recv() => match msg {
                    Some(response) => self.on_response(response),
                    None => {
                        error!("inference task channel closed, stopping render loop");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.tick().await.is_err() {
                        break;
                    }
                }
            }
        }

        let s = self.stats;
        info!(
            status = %self.status(),
            outstanding = ?self.gate().outstanding(),
            detections = self.detections().len(),
            ticks = s.ticks,
            dispatched = s.dispatched,
            skipped = s.skipped,
            completed = s.completed,
            errors = s.errors,
            stale = s.stale,
            abandoned = s.abandoned,
            capture_failures = s.capture_failures,
            "render loop stopped"
        );
        s
    }
}
