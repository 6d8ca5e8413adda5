// src/core/correlation.rs

//! Matches asynchronous notification frames to the requests waiting for them.
//!
//! # Core Design: First Match Wins
//!
//! The device answers on a separate notification characteristic and its frames
//! carry no request identifier. A caller that wants a reply registers an
//! expectation (a response prefix plus a deadline) *before* it writes, and
//! every inbound frame is offered to the outstanding expectations in
//! registration order. The first expectation that accepts the frame receives
//! it through a `oneshot` channel and leaves the registry; the frame is never
//! offered to anyone else. Frames nobody is waiting for are dropped.
//!
//! Each expectation ends in exactly one of three states: matched, timed out or
//! cancelled. Whoever removes the entry from the queue decides which, so a
//! late frame can never complete a slot whose owner has already given up.

use crate::core::FurbyError;
use crate::core::metrics;
use crate::core::protocol::{Frame, ResponseMatcher, frame_hex};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace};

/// The terminal state reached by an expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectationOutcome {
    Matched,
    TimedOut,
    Cancelled,
}

impl ExpectationOutcome {
    fn label(self) -> &'static str {
        match self {
            ExpectationOutcome::Matched => "matched",
            ExpectationOutcome::TimedOut => "timed_out",
            ExpectationOutcome::Cancelled => "cancelled",
        }
    }
}

/// An outstanding request for a frame.
#[derive(Debug)]
struct PendingExpectation {
    id: u64,
    matcher: ResponseMatcher,
    waker: oneshot::Sender<Frame>,
    // `None` until the owner arms it; an unarmed entry never expires.
    deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    // Insertion order is the matching order.
    pending: VecDeque<PendingExpectation>,
}

/// Holds the ordered set of outstanding response expectations.
///
/// `register` and `cancel` run in the caller's task while `on_frame` runs in the
/// frame dispatcher; all of them go through one mutex.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    inner: Mutex<RegistryInner>,
}

impl CorrelationRegistry {
    /// Creates a new, empty `CorrelationRegistry`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends an expectation to the tail of the queue. It stops being eligible
    /// for matching once `wait` has elapsed.
    pub fn register(self: &Arc<Self>, matcher: ResponseMatcher, wait: Duration) -> Expectation {
        let mut expectation = self.register_unarmed(matcher, wait);
        expectation.arm();
        expectation
    }

    /// Appends an expectation whose clock has not started yet. It is eligible
    /// for matching right away and expires `wait` after `Expectation::arm`.
    pub fn register_unarmed(
        self: &Arc<Self>,
        matcher: ResponseMatcher,
        wait: Duration,
    ) -> Expectation {
        let (tx, rx) = oneshot::channel();

        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.wrapping_add(1);
        let id = inner.next_id;
        debug!("Registered expectation {} for {:?}", id, matcher);
        inner.pending.push_back(PendingExpectation {
            id,
            matcher,
            waker: tx,
            deadline: None,
        });
        metrics::PENDING_EXPECTATIONS.set(inner.pending.len() as f64);
        drop(inner);

        Expectation {
            id,
            deadline: None,
            wait,
            rx,
            registry: Arc::clone(self),
            settled: false,
        }
    }

    /// Offers an inbound frame to the outstanding expectations. Completes at most
    /// one of them and returns whether the frame was consumed.
    pub fn on_frame(&self, frame: Frame) -> bool {
        let now = Instant::now();
        let mut frame = frame;
        let mut inner = self.inner.lock();

        loop {
            let position = inner
                .pending
                .iter()
                .position(|p| {
                    p.deadline.is_none_or(|deadline| now < deadline) && p.matcher.matches(&frame)
                });
            let Some(entry) = position.and_then(|index| inner.pending.remove(index)) else {
                metrics::FRAMES_UNMATCHED_TOTAL.inc();
                trace!("Dropping unsolicited frame {}", frame_hex(&frame));
                return false;
            };
            metrics::PENDING_EXPECTATIONS.set(inner.pending.len() as f64);

            match entry.waker.send(frame) {
                Ok(()) => {
                    debug!("Frame completed expectation {}", entry.id);
                    metrics::EXPECTATIONS_TOTAL
                        .with_label_values(&[ExpectationOutcome::Matched.label()])
                        .inc();
                    return true;
                }
                // The waiting side went away without cleaning up; offer the frame to the next one.
                Err(returned) => frame = returned,
            }
        }
    }

    /// Withdraws an expectation if it is still pending. Returns false if a frame
    /// already completed it.
    pub fn cancel(&self, mut expectation: Expectation) -> bool {
        expectation.settled = true;
        let removed = self.remove(expectation.id);
        if removed {
            metrics::EXPECTATIONS_TOTAL
                .with_label_values(&[ExpectationOutcome::Cancelled.label()])
                .inc();
        }
        removed
    }

    /// Drops every outstanding expectation; their waiters observe `Cancelled`.
    pub fn cancel_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.pending.len();
        inner.pending.clear();
        metrics::PENDING_EXPECTATIONS.set(0.0);
        if count > 0 {
            metrics::EXPECTATIONS_TOTAL
                .with_label_values(&[ExpectationOutcome::Cancelled.label()])
                .inc_by(count as f64);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    fn set_deadline(&self, id: u64, deadline: Instant) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.pending.iter_mut().find(|p| p.id == id) {
            entry.deadline = Some(deadline);
        }
    }

    fn remove(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.pending.len();
        inner.pending.retain(|p| p.id != id);
        let removed = inner.pending.len() != before;
        metrics::PENDING_EXPECTATIONS.set(inner.pending.len() as f64);
        removed
    }
}

/// The caller's side of a registered expectation.
///
/// Dropping an unsettled handle removes its entry from the registry.
#[derive(Debug)]
pub struct Expectation {
    id: u64,
    deadline: Option<Instant>,
    wait: Duration,
    rx: oneshot::Receiver<Frame>,
    registry: Arc<CorrelationRegistry>,
    settled: bool,
}

impl Expectation {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Starts the response clock. Later calls keep the first deadline.
    pub fn arm(&mut self) -> Instant {
        if let Some(deadline) = self.deadline {
            return deadline;
        }
        let deadline = Instant::now() + self.wait;
        self.deadline = Some(deadline);
        self.registry.set_deadline(self.id, deadline);
        deadline
    }

    /// Suspends until a matching frame arrives or the deadline passes. Arms the
    /// expectation first if the caller has not.
    pub async fn wait(mut self) -> Result<Frame, FurbyError> {
        let deadline = self.arm();
        let (result, outcome) = match timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(frame)) => (Ok(frame), None),
            // The registry dropped the waker (session teardown); already counted there.
            Ok(Err(_)) => (Err(FurbyError::Cancelled), None),
            Err(_) => {
                if self.registry.remove(self.id) {
                    (
                        Err(FurbyError::Timeout(self.wait)),
                        Some(ExpectationOutcome::TimedOut),
                    )
                } else {
                    // Lost the race against `on_frame`: the match stands.
                    match self.rx.try_recv() {
                        Ok(frame) => (Ok(frame), None),
                        Err(_) => (Err(FurbyError::Cancelled), None),
                    }
                }
            }
        };
        if let Some(outcome) = outcome {
            metrics::EXPECTATIONS_TOTAL
                .with_label_values(&[outcome.label()])
                .inc();
        }
        self.settled = true;
        result
    }

    /// Withdraws this expectation. Equivalent to `CorrelationRegistry::cancel`.
    pub fn cancel(self) -> bool {
        let registry = Arc::clone(&self.registry);
        registry.cancel(self)
    }
}

impl Drop for Expectation {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.remove(self.id);
        }
    }
}
