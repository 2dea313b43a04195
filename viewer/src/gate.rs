use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Single-slot admission control for inference requests.
///
/// `Free → Held` only through [`acquire`](Self::acquire), `Held → Free` only
/// through [`release`](Self::release) or [`expire`](Self::expire), so the two
/// transitions strictly alternate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InFlightGate {
    #[default]
    Free,
    Held {
        /// Sequence number of the outstanding frame.
        seq: u64,
        since: Instant,
    },
}

impl InFlightGate {
    pub fn is_held(&self) -> bool {
        matches!(self, InFlightGate::Held { .. })
    }

    /// Sequence number of the outstanding request, if any.
    pub fn outstanding(&self) -> Option<u64> {
        match self {
            InFlightGate::Held { seq, .. } => Some(*seq),
            InFlightGate::Free => None,
        }
    }

    /// Claim the slot for `seq`. Returns false, leaving the gate untouched,
    /// when a request is already outstanding.
    pub fn acquire(&mut self, seq: u64) -> bool {
        if self.is_held() {
            return false;
        }
        *self = InFlightGate::Held {
            seq,
            since: Instant::now(),
        };
        debug!(seq, "gate acquired");
        true
    }

    /// Free the slot for a response answering `answers`.
    ///
    /// A response without a sequence number releases whatever is held. One
    /// naming a different sequence is stale and leaves the gate alone.
    /// Returns whether the gate was released.
    pub fn release(&mut self, answers: Option<u64>) -> bool {
        match (*self, answers) {
            (InFlightGate::Free, _) => false,
            (InFlightGate::Held { seq, .. }, Some(answered)) if answered != seq => false,
            (InFlightGate::Held { seq, .. }, _) => {
                *self = InFlightGate::Free;
                debug!(seq, "gate released");
                true
            }
        }
    }

    /// Restart the hold timer. Called when the task shows it is still working
    /// on the outstanding request, e.g. while the detector is loading.
    pub fn touch(&mut self) {
        if let InFlightGate::Held { since, .. } = self {
            *since = Instant::now();
        }
    }

    /// Force the slot free if it has been held for at least `timeout`
    /// without being touched.
    /// Returns the abandoned sequence number.
    pub fn expire(&mut self, timeout: Duration) -> Option<u64> {
        match *self {
            InFlightGate::Held { seq, since } if since.elapsed() >= timeout => {
                *self = InFlightGate::Free;
                Some(seq)
            }
            _ => None,
        }
    }
}
