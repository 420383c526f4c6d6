//! Progress reporting with sub-range remapping.
//!
//! Handlers receive a reporter scoped to a window of the overall 0-100 job
//! progress. `subrange` hands a sub-phase its own 0.0-1.0 scale that lands
//! inside the parent window, so a handler can delegate phases without the
//! phases knowing their share of the whole. All reporters derived from one
//! job share a clamp: overall progress never moves backwards even when
//! windows interleave.

use super::broker::{BrokerProvider, JobBroker};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Reports execution progress for one claimed job
#[derive(Clone)]
pub struct ProgressReporter {
    broker: Arc<BrokerProvider>,
    queue: String,
    job_id: String,
    /// Window bounds in overall percent
    lo: f64,
    hi: f64,
    /// Highest percent reported so far, shared across subranges
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(broker: Arc<BrokerProvider>, queue: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
            job_id: job_id.into(),
            lo: 0.0,
            hi: 100.0,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Reporter that swallows all reports, for inline (passthrough) execution
    pub fn noop() -> Self {
        Self::new(Arc::new(BrokerProvider::None), "", "")
    }

    /// Derive a reporter whose 0.0-1.0 maps onto `[lo, hi]` of this
    /// reporter's own window
    pub fn subrange(&self, lo: f64, hi: f64) -> Self {
        let width = self.hi - self.lo;
        let lo = lo.clamp(0.0, 1.0);
        let hi = hi.clamp(lo, 1.0);
        Self {
            broker: Arc::clone(&self.broker),
            queue: self.queue.clone(),
            job_id: self.job_id.clone(),
            lo: self.lo + width * lo,
            hi: self.lo + width * hi,
            last: Arc::clone(&self.last),
        }
    }

    /// Report completion of this window as a fraction in 0.0-1.0
    pub async fn report_fraction(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let overall = (self.lo + (self.hi - self.lo) * fraction).round() as u8;
        self.publish(overall.min(100)).await;
    }

    /// Report an absolute percent within this window (0-100)
    pub async fn report_percent(&self, percent: u8) {
        self.report_fraction(percent.min(100) as f64 / 100.0).await;
    }

    async fn publish(&self, overall: u8) {
        // Shared monotonic clamp: keep the max across every derived reporter
        let previous = self.last.fetch_max(overall, Ordering::SeqCst);
        let effective = previous.max(overall);

        if let Err(e) = self
            .broker
            .update_progress(&self.queue, &self.job_id, effective)
            .await
        {
            warn!(
                queue = %self.queue,
                job_id = %self.job_id,
                error = %e,
                "Progress update failed (non-fatal)"
            );
        }
    }
}
