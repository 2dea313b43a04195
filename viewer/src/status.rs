use std::fmt;

use live_detect_common::protocol::{LoadingEvent, Response};
use tracing::{info, warn};

/// User-facing pipeline status, derived from task messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Starting,
    Downloading(u32),
    Ready,
    WorkerError(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Starting => write!(f, "Loading model..."),
            Status::Downloading(pct) => write!(f, "Downloading Model: {pct}%"),
            Status::Ready => write!(f, "Model Loaded. Inference Running."),
            Status::WorkerError(msg) => write!(f, "Worker Error: {msg}"),
        }
    }
}

impl Status {
    /// Status implied by `response`.
    pub fn from_response(response: &Response) -> Self {
        match response {
            Response::Loading {
                data: LoadingEvent::Progress { progress },
            } => Status::Downloading(progress.clamp(0.0, 100.0).round() as u32),
            Response::Loading {
                data: LoadingEvent::Done,
            }
            | Response::Complete { .. } => Status::Ready,
            Response::Error { data, .. } => Status::WorkerError(data.clone()),
        }
    }
}

#[derive(Debug)]
pub struct StatusLine {
    current: Status,
}

impl Default for StatusLine {
    fn default() -> Self {
        Self {
            current: Status::Starting,
        }
    }
}

impl StatusLine {
    pub fn current(&self) -> &Status {
        &self.current
    }

    /// Replace the status. Logs and returns true only when it changed.
    pub fn update(&mut self, next: Status) -> bool {
        if next == self.current {
            return false;
        }
        match &next {
            Status::WorkerError(_) => warn!(status = %next, "status changed"),
            _ => info!(status = %next, "status changed"),
        }
        self.current = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use live_detect_common::detection::DetectionSet;

    #[test]
    fn texts() {
        assert_eq!(Status::Downloading(42).to_string(), "Downloading Model: 42%");
        assert_eq!(Status::Ready.to_string(), "Model Loaded. Inference Running.");
        assert_eq!(
            Status::WorkerError("boom".into()).to_string(),
            "Worker Error: boom"
        );
    }

    #[test]
    fn progress_rounds_to_whole_percent() {
        assert_eq!(
            Status::from_response(&Response::progress(41.6)),
            Status::Downloading(42)
        );
        assert_eq!(
            Status::from_response(&Response::progress(120.0)),
            Status::Downloading(100)
        );
    }

    #[test]
    fn update_reports_changes_only() {
        let mut line = StatusLine::default();
        assert!(line.update(Status::Downloading(10)));
        assert!(!line.update(Status::Downloading(10)));
        assert!(line.update(Status::WorkerError("x".into())));

        // A later success restores the running status.
        let complete = Response::Complete {
            output: DetectionSet::default(),
            seq: Some(1),
        };
        assert!(line.update(Status::from_response(&complete)));
        assert_eq!(line.current(), &Status::Ready);
    }
}
