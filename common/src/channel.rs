//! Bidirectional, ordered, non-blocking message channel between the render
//! loop and the inference task.
//!
//! Each direction is an unbounded FIFO: a send never blocks, never reorders
//! and never drops. Backpressure is the sender's job (the in-flight gate),
//! not the channel's.

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::protocol::{Request, Response};

/// The peer endpoint has been dropped. Nothing downstream can recover from
/// this, so callers treat it as fatal for their loop.
#[derive(Debug, thiserror::Error)]
#[error("message channel closed: peer endpoint dropped")]
pub struct ChannelClosed;

/// Render-loop side: posts requests, receives responses.
#[derive(Debug)]
pub struct LoopEndpoint {
    requests: UnboundedSender<Request>,
    responses: UnboundedReceiver<Response>,
}

/// Inference-task side: receives requests, posts responses.
#[derive(Debug)]
pub struct TaskEndpoint {
    requests: UnboundedReceiver<Request>,
    responses: UnboundedSender<Response>,
}

pub fn channel() -> (LoopEndpoint, TaskEndpoint) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    (
        LoopEndpoint {
            requests: req_tx,
            responses: resp_rx,
        },
        TaskEndpoint {
            requests: req_rx,
            responses: resp_tx,
        },
    )
}

impl LoopEndpoint {
    /// Send a request. The request (and any frame inside it) is moved.
    pub fn post(&self, request: Request) -> Result<(), ChannelClosed> {
        self.requests.send(request).map_err(|_| ChannelClosed)
    }

    /// Wait for the next response. `None` once the task side is gone.
    pub async fn recv(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    /// Non-blocking poll. `Ok(None)` when nothing is queued.
    pub fn try_recv(&mut self) -> Result<Option<Response>, ChannelClosed> {
        match self.responses.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelClosed),
        }
    }
}

impl TaskEndpoint {
    /// Wait for the next request. `None` once the loop side is gone.
    pub async fn recv(&mut self) -> Option<Request> {
        self.requests.recv().await
    }

    pub fn post(&self, response: Response) -> Result<(), ChannelClosed> {
        self.responses.send(response).map_err(|_| ChannelClosed)
    }

    /// A cloneable handle for posting responses from outside the task loop,
    /// e.g. a progress callback running inside detector construction.
    pub fn responder(&self) -> Responder {
        Responder(self.responses.clone())
    }
}

#[derive(Debug, Clone)]
pub struct Responder(UnboundedSender<Response>);

impl Responder {
    pub fn post(&self, response: Response) -> Result<(), ChannelClosed> {
        self.0.send(response).map_err(|_| ChannelClosed)
    }
}
