//! Per-instance signal mailbox and the deadline race

use crate::models::workflow::{Signal, SignalDecision, SignalOutcome, SignalResolution};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Approver id recorded when the deadline resolves a review
pub const TIMEOUT_APPROVER: &str = "timeout";

/// Comment recorded when the deadline resolves a review
pub const TIMEOUT_COMMENT: &str = "No decision received before the approval deadline";

/// Receiving half of a one-shot mailbox. Consuming it yields exactly one resolution.
#[derive(Debug)]
pub struct SignalChannel {
    receiver: oneshot::Receiver<Signal>,
}

impl SignalChannel {
    /// Open a mailbox; the sender goes to whoever routes signals for the instance
    pub fn open() -> (oneshot::Sender<Signal>, SignalChannel) {
        let (tx, rx) = oneshot::channel();
        (tx, SignalChannel { receiver: rx })
    }

    /// Wait for a signal until `deadline` elapses
    pub async fn wait(self, deadline: Duration) -> SignalResolution {
        TimeoutGuard::new(deadline).race(self).await
    }
}

/// Races a signal channel against a deadline
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    deadline: Duration,
}

impl TimeoutGuard {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Resolve with the first of signal or deadline. The receiver is dropped on return,
    /// so later sends fail on the sender side.
    pub async fn race(self, channel: SignalChannel) -> SignalResolution {
        match tokio::time::timeout(self.deadline, channel.receiver).await {
            Ok(Ok(signal)) => {
                let outcome = match signal.decision {
                    SignalDecision::Approved => SignalOutcome::Approved,
                    SignalDecision::Rejected => SignalOutcome::Rejected,
                };
                SignalResolution {
                    outcome,
                    approver_id: signal.approver_id,
                    comment: signal.comment,
                    resolved_at: Utc::now(),
                }
            }
            Ok(Err(_)) => {
                // Sender dropped without a decision; nobody can deliver one anymore
                tracing::warn!("Signal sender closed before a decision was delivered");
                Self::timed_out()
            }
            Err(_) => Self::timed_out(),
        }
    }

    fn timed_out() -> SignalResolution {
        SignalResolution {
            outcome: SignalOutcome::TimedOut,
            approver_id: TIMEOUT_APPROVER.to_string(),
            comment: Some(TIMEOUT_COMMENT.to_string()),
            resolved_at: Utc::now(),
        }
    }
}
