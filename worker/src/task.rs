use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use live_detect_common::channel::TaskEndpoint;
use live_detect_common::detection::DetectionSet;
use live_detect_common::frame::FrameBuffer;
use live_detect_common::protocol::{Request, Response};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::detector::{DetectOptions, Detector, DetectorError, DetectorLoader, ProgressSink};
use crate::lazy::LazyDetector;

/// Counters reported when the task shuts down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSummary {
    pub requests: u64,
    pub completed: u64,
    pub failed: u64,
    pub frames_released: u64,
    pub bytes_released: u64,
}

/// The inference side of the pipeline. Driven purely by incoming requests:
/// one `predict` in, exactly one `complete` or `error` out, in order.
pub struct InferenceTask<L: DetectorLoader> {
    detector: Arc<LazyDetector<L>>,
    endpoint: TaskEndpoint,
    options: DetectOptions,
}

impl<L: DetectorLoader> InferenceTask<L> {
    pub fn new(detector: Arc<LazyDetector<L>>, endpoint: TaskEndpoint) -> Self {
        Self {
            detector,
            endpoint,
            options: DetectOptions::default(),
        }
    }

    pub fn spawn(self) -> JoinHandle<TaskSummary> {
        tokio::spawn(self.run())
    }

    /// Serve requests until the render loop drops its endpoint.
    pub async fn run(mut self) -> TaskSummary {
        info!(
            threshold = self.options.threshold,
            percentage = self.options.percentage,
            "inference task started"
        );
        let mut summary = TaskSummary::default();

        while let Some(request) = self.endpoint.recv().await {
            let Request::Predict(frame) = request;
            summary.requests += 1;
            let response = self.predict(frame, &mut summary).await;
            if let Err(e) = self.endpoint.post(response) {
                error!(error = %e, "cannot deliver inference response, stopping task");
                break;
            }
        }

        info!(
            requests = summary.requests,
            completed = summary.completed,
            failed = summary.failed,
            "inference task stopped"
        );
        summary
    }

    async fn predict(&self, frame: FrameBuffer, summary: &mut TaskSummary) -> Response {
        let seq = frame.seq;
        debug!(seq, width = frame.width(), height = frame.height(), "predict received");

        let outcome = self.infer(&frame).await;

        // The frame is ours now; free it whatever the outcome.
        summary.bytes_released += frame.release() as u64;
        summary.frames_released += 1;

        match outcome {
            Ok(output) => {
                summary.completed += 1;
                debug!(seq, detections = output.len(), "inference complete");
                Response::Complete {
                    output,
                    seq: Some(seq),
                }
            }
            Err(e) => {
                summary.failed += 1;
                warn!(seq, error = %e, "inference failed");
                Response::Error {
                    data: e.to_string(),
                    seq: Some(seq),
                }
            }
        }
    }

    async fn infer(&self, frame: &FrameBuffer) -> Result<DetectionSet, DetectorError> {
        let progress = ProgressSink::new(self.endpoint.responder());
        let run = async {
            let detector = self.detector.get(progress).await?;
            let raw = detector.detect(frame.pixels(), self.options).await?;
            Ok::<_, DetectorError>(DetectionSet::above_threshold(raw, self.options.threshold))
        };
        match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(DetectorError::Panicked(panic_message(&*panic))),
        }
    }
}

/// Wait up to `grace` for a spawned task to drain, then abort it. A
/// detector stuck in a call would otherwise keep the process alive forever.
/// `None` when the task was aborted or had already failed.
pub async fn join_with_grace(
    mut handle: JoinHandle<TaskSummary>,
    grace: Duration,
) -> Option<TaskSummary> {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(summary)) => Some(summary),
        Ok(Err(e)) => {
            error!(error = %e, "inference task failed");
            None
        }
        Err(_) => {
            handle.abort();
            warn!(
                grace_secs = grace.as_secs_f64(),
                "inference task still busy at shutdown, aborted"
            );
            None
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::LifecycleState;
    use image::RgbaImage;
    use live_detect_common::channel::{self, LoopEndpoint};
    use live_detect_common::detection::{BoundingBox, DetectionResult};
    use live_detect_common::protocol::LoadingEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Hang,
    }

    struct MockDetector {
        scores: Vec<f32>,
        behaviour: Behaviour,
    }

    impl Detector for MockDetector {
        async fn detect(
            &self,
            _image: &RgbaImage,
            options: DetectOptions,
        ) -> Result<Vec<DetectionResult>, DetectorError> {
            assert!(options.percentage);
            match self.behaviour {
                Behaviour::Succeed => Ok(self
                    .scores
                    .iter()
                    .enumerate()
                    .map(|(i, &score)| DetectionResult {
                        score,
                        label: format!("obj{i}"),
                        bbox: BoundingBox {
                            xmin: 0.1,
                            ymin: 0.1,
                            xmax: 0.2,
                            ymax: 0.2,
                        },
                    })
                    .collect()),
                Behaviour::Fail => Err(DetectorError::Inference("bad frame".into())),
                Behaviour::Panic => panic!("tensor shape mismatch"),
                Behaviour::Hang => std::future::pending().await,
            }
        }
    }

    struct MockLoader {
        scores: Vec<f32>,
        behaviour: Behaviour,
        loads: Arc<AtomicUsize>,
        fail_first_load: bool,
    }

    impl MockLoader {
        fn new(scores: Vec<f32>, behaviour: Behaviour) -> Self {
            Self {
                scores,
                behaviour,
                loads: Arc::new(AtomicUsize::new(0)),
                fail_first_load: false,
            }
        }
    }

    impl DetectorLoader for MockLoader {
        type Detector = MockDetector;

        async fn load(&self, progress: ProgressSink) -> Result<MockDetector, DetectorError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            for pct in [25.0, 75.0] {
                progress.report(pct);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            if self.fail_first_load && n == 0 {
                return Err(DetectorError::Load("download interrupted".into()));
            }
            Ok(MockDetector {
                scores: self.scores.clone(),
                behaviour: self.behaviour,
            })
        }
    }

    fn frame(seq: u64) -> Request {
        Request::Predict(FrameBuffer::new(RgbaImage::new(4, 3), seq, 0))
    }

    async fn terminal(loop_end: &mut LoopEndpoint, seen: &mut Vec<Response>) -> Response {
        loop {
            let msg = loop_end.recv().await.expect("task hung up");
            let done = msg.is_terminal();
            seen.push(msg.clone());
            if done {
                return msg;
            }
        }
    }

    fn done_events(seen: &[Response]) -> usize {
        seen.iter()
            .filter(|m| matches!(m, Response::Loading { data: LoadingEvent::Done }))
            .count()
    }

    #[tokio::test]
    async fn threshold_filters_in_order() {
        let (mut loop_end, task_end) = channel::channel();
        let lazy = Arc::new(LazyDetector::new(MockLoader::new(
            vec![0.9, 0.4, 0.6],
            Behaviour::Succeed,
        )));
        let handle = InferenceTask::new(lazy, task_end).spawn();

        loop_end.post(frame(1)).unwrap();
        let mut seen = Vec::new();
        let Response::Complete { output, seq } = terminal(&mut loop_end, &mut seen).await else {
            panic!("expected complete");
        };
        assert_eq!(seq, Some(1));
        let scores: Vec<f32> = output.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.6]);
        let labels: Vec<&str> = output.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["obj0", "obj2"]);

        // Progress ticks precede exactly one done, which precedes the result.
        assert_eq!(
            seen,
            vec![
                Response::progress(25.0),
                Response::progress(75.0),
                Response::done(),
                Response::Complete {
                    output: output.clone(),
                    seq: Some(1)
                },
            ]
        );

        drop(loop_end);
        let summary = handle.await.unwrap();
        assert_eq!(summary.requests, 1);
        assert_eq!(summary.frames_released, 1);
        assert_eq!(summary.bytes_released, 4 * 3 * 4);
    }

    #[tokio::test]
    async fn one_construction_for_back_to_back_requests() {
        let (mut loop_end, task_end) = channel::channel();
        let loader = MockLoader::new(vec![0.8], Behaviour::Succeed);
        let loads = Arc::clone(&loader.loads);
        let lazy = Arc::new(LazyDetector::new(loader));
        let handle = InferenceTask::new(Arc::clone(&lazy), task_end).spawn();

        for seq in 0..3 {
            loop_end.post(frame(seq)).unwrap();
        }
        let mut seen = Vec::new();
        for expected in 0..3 {
            let reply = terminal(&mut loop_end, &mut seen).await;
            assert_eq!(reply.answers(), Some(expected));
            assert!(matches!(reply, Response::Complete { .. }));
        }
        assert_eq!(done_events(&seen), 1);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(lazy.state(), LifecycleState::Ready);

        drop(loop_end);
        let summary = handle.await.unwrap();
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.frames_released, 3);
    }

    #[tokio::test]
    async fn inference_failure_reports_error_and_task_survives() {
        let (mut loop_end, task_end) = channel::channel();
        let lazy = Arc::new(LazyDetector::new(MockLoader::new(vec![0.9], Behaviour::Fail)));
        let handle = InferenceTask::new(Arc::clone(&lazy), task_end).spawn();

        let mut seen = Vec::new();
        for seq in [10, 11] {
            loop_end.post(frame(seq)).unwrap();
            match terminal(&mut loop_end, &mut seen).await {
                Response::Error { data, seq: got } => {
                    assert_eq!(got, Some(seq));
                    assert!(data.contains("bad frame"), "{data}");
                }
                other => panic!("expected error, got {other:?}"),
            }
        }
        assert_eq!(lazy.state(), LifecycleState::Ready);

        drop(loop_end);
        let summary = handle.await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.frames_released, 2);
    }

    #[tokio::test]
    async fn panicking_detector_becomes_error() {
        let (mut loop_end, task_end) = channel::channel();
        let lazy = Arc::new(LazyDetector::new(MockLoader::new(vec![], Behaviour::Panic)));
        let handle = InferenceTask::new(lazy, task_end).spawn();

        loop_end.post(frame(5)).unwrap();
        let mut seen = Vec::new();
        let Response::Error { data, .. } = terminal(&mut loop_end, &mut seen).await else {
            panic!("expected error");
        };
        assert!(data.contains("tensor shape mismatch"), "{data}");

        drop(loop_end);
        assert_eq!(handle.await.unwrap().frames_released, 1);
    }

    #[tokio::test]
    async fn construction_failure_is_retried_on_next_predict() {
        let (mut loop_end, task_end) = channel::channel();
        let mut loader = MockLoader::new(vec![0.7], Behaviour::Succeed);
        loader.fail_first_load = true;
        let loads = Arc::clone(&loader.loads);
        let lazy = Arc::new(LazyDetector::new(loader));
        let handle = InferenceTask::new(Arc::clone(&lazy), task_end).spawn();

        let mut seen = Vec::new();
        loop_end.post(frame(1)).unwrap();
        let first = terminal(&mut loop_end, &mut seen).await;
        assert!(matches!(first, Response::Error { ref data, .. } if data.contains("download interrupted")));
        assert_eq!(lazy.state(), LifecycleState::Loading);
        assert_eq!(done_events(&seen), 0);

        loop_end.post(frame(2)).unwrap();
        let second = terminal(&mut loop_end, &mut seen).await;
        assert!(matches!(second, Response::Complete { seq: Some(2), .. }));
        assert_eq!(done_events(&seen), 1);
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        drop(loop_end);
        assert_eq!(handle.await.unwrap().frames_released, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_aborted_after_grace() {
        let (loop_end, task_end) = channel::channel();
        let lazy = Arc::new(LazyDetector::new(MockLoader::new(vec![], Behaviour::Hang)));
        let handle = InferenceTask::new(lazy, task_end).spawn();

        loop_end.post(frame(1)).unwrap();
        drop(loop_end);
        assert_eq!(join_with_grace(handle, Duration::from_secs(5)).await, None);
    }

    #[tokio::test]
    async fn idle_task_joins_within_grace() {
        let (loop_end, task_end) = channel::channel();
        let lazy = Arc::new(LazyDetector::new(MockLoader::new(vec![0.9], Behaviour::Succeed)));
        let handle = InferenceTask::new(lazy, task_end).spawn();

        loop_end.post(frame(1)).unwrap();
        drop(loop_end);
        let summary = join_with_grace(handle, Duration::from_secs(5)).await.unwrap();
        assert_eq!((summary.requests, summary.completed), (1, 1));
    }
}
