//! Messages exchanged between the render loop and the inference task.
//!
//! Task→loop messages have a JSON wire form tagged by `status`:
//!
//! ```text
//! {"status":"loading","data":{"status":"progress","progress":42.0}}
//! {"status":"loading","data":{"status":"done"}}
//! {"status":"complete","output":[{"score":0.9,"label":"cat","box":{...}}],"seq":7}
//! {"status":"error","data":"inference failed: ...","seq":7}
//! ```
//!
//! `seq` is optional on the wire. `predict` never leaves the process because
//! its frame is moved, not copied.

use serde::{Deserialize, Serialize};

use crate::detection::DetectionSet;
use crate::frame::FrameBuffer;

/// Loop → task.
#[derive(Debug)]
pub enum Request {
    /// Run inference on this frame. The task owns and must release it.
    Predict(FrameBuffer),
}

/// Detector construction progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LoadingEvent {
    Progress { progress: f64 },
    Done,
}

/// Task → loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Loading {
        data: LoadingEvent,
    },
    Complete {
        output: DetectionSet,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
    Error {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
    },
}

impl Response {
    pub fn progress(progress: f64) -> Self {
        Response::Loading {
            data: LoadingEvent::Progress { progress },
        }
    }

    pub fn done() -> Self {
        Response::Loading {
            data: LoadingEvent::Done,
        }
    }

    /// The request this message answers, if it answers one.
    pub fn answers(&self) -> Option<u64> {
        match self {
            Response::Complete { seq, .. } | Response::Error { seq, .. } => *seq,
            Response::Loading { .. } => None,
        }
    }

    /// True for `complete` and `error`, the two kinds that release the gate.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Loading { .. })
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(|e| WireError::Encode(e.to_string()))
    }

    /// Decode and validate one message. Unknown kinds and payloads of the
    /// wrong shape are rejected here rather than at field access.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(data).map_err(|e| WireError::Decode(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("malformed message: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, DetectionResult};
    use serde_json::json;

    fn one_box() -> DetectionSet {
        DetectionSet::new(vec![DetectionResult {
            score: 0.75,
            label: "dog".into(),
            bbox: BoundingBox {
                xmin: 0.25,
                ymin: 0.25,
                xmax: 0.5,
                ymax: 0.75,
            },
        }])
    }

    #[test]
    fn loading_progress_wire_shape() {
        let value = serde_json::to_value(Response::progress(42.0)).unwrap();
        assert_eq!(
            value,
            json!({"status": "loading", "data": {"status": "progress", "progress": 42.0}})
        );
    }

    #[test]
    fn loading_done_wire_shape() {
        let value = serde_json::to_value(Response::done()).unwrap();
        assert_eq!(value, json!({"status": "loading", "data": {"status": "done"}}));
    }

    #[test]
    fn complete_wire_shape() {
        let msg = Response::Complete {
            output: one_box(),
            seq: Some(7),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "complete",
                "output": [{
                    "score": 0.75,
                    "label": "dog",
                    "box": {"xmin": 0.25, "ymin": 0.25, "xmax": 0.5, "ymax": 0.75}
                }],
                "seq": 7
            })
        );
        assert_eq!(Response::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn seq_is_optional_on_decode() {
        let msg = Response::decode(br#"{"status":"error","data":"boom"}"#).unwrap();
        assert_eq!(
            msg,
            Response::Error {
                data: "boom".into(),
                seq: None
            }
        );
        assert!(msg.is_terminal());
        assert_eq!(msg.answers(), None);
    }

    #[test]
    fn seq_omitted_when_absent() {
        let value = serde_json::to_value(Response::Error {
            data: "boom".into(),
            seq: None,
        })
        .unwrap();
        assert_eq!(value, json!({"status": "error", "data": "boom"}));
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(matches!(
            Response::decode(br#"{"status":"predict","image":null}"#),
            Err(WireError::Decode(_))
        ));
    }

    #[test]
    fn wrong_payload_shape_rejected() {
        // `complete` must carry a list, `error` a string.
        assert!(Response::decode(br#"{"status":"complete","output":"nope"}"#).is_err());
        assert!(Response::decode(br#"{"status":"error","data":{"x":1}}"#).is_err());
        assert!(Response::decode(br#"{"status":"loading","data":{"status":"halfway"}}"#).is_err());
    }

    #[test]
    fn loading_is_not_terminal() {
        assert!(!Response::done().is_terminal());
        assert!(!Response::progress(3.0).is_terminal());
    }
}
