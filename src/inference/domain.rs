//! Value types shared by the predictor and its workers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use super::context::Context;
use crate::common::error::BoostResult;
use crate::data::FeatureVector;

/// Outcome delivered exactly once per request.
pub type Response = BoostResult<Vec<f32>>;

/// One unit of queued work.
pub(crate) struct Request {
    pub(crate) input: Box<dyn FeatureVector>,
    pub(crate) ctx: Context,
    reply: Sender<Response>,
}

impl Request {
    pub(crate) fn new(input: Box<dyn FeatureVector>, ctx: Context, reply: Sender<Response>) -> Self {
        Self { input, ctx, reply }
    }

    /// Deliver the response. A caller that stopped waiting is not an error.
    pub(crate) fn respond(self, response: Response) {
        let _ = self.reply.send(response);
    }
}

/// Predictor lifecycle. Transitions only move forward.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Ready,
    Closing,
    Closed,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Ready => "ready",
            Lifecycle::Closing => "closing",
            Lifecycle::Closed => "closed",
        }
    }

    pub fn is_accepting(&self) -> bool {
        matches!(self, Lifecycle::Ready)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time request counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictorStats {
    pub workers: usize,
    /// Requests placed on the queue.
    pub accepted: u64,
    /// Requests a worker evaluated successfully.
    pub completed: u64,
    /// Requests a worker evaluated with an error.
    pub failed: u64,
    /// Queued requests dropped by shutdown or by their caller's context.
    pub cancelled: u64,
    /// Calls refused because the predictor was closing or closed.
    pub rejected: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) accepted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
    pub(crate) rejected: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, workers: usize) -> PredictorStats {
        PredictorStats {
            workers,
            accepted: self.accepted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ready_accepts() {
        assert!(Lifecycle::Ready.is_accepting());
        assert!(!Lifecycle::Closing.is_accepting());
        assert!(!Lifecycle::Closed.is_accepting());
        assert_eq!(Lifecycle::Closing.to_string(), "closing");
    }

    #[test]
    fn snapshot_reads_counters() {
        let counters = Counters::default();
        Counters::bump(&counters.accepted);
        Counters::bump(&counters.accepted);
        Counters::bump(&counters.completed);
        let stats = counters.snapshot(4);
        assert_eq!(stats.workers, 4);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }
}
