//! Report Queue
//!
//! FIFO handing decoded reports from the radio-event context (single
//! producer) to the processing loop (single consumer). Enqueue never blocks;
//! the consumer sleeps until a report is available and wakes once per report.
//!
//! The queue is bounded. When the consumer stalls and the queue is full, the
//! newest report is dropped and counted.

use crate::domain::report::InputReport;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("report queue full (capacity {0}), report dropped")]
    Full(usize),
    #[error("report queue closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Counters {
    depth: AtomicUsize,
    dropped: AtomicU64,
}

/// Largest accepted queue capacity.
pub const MAX_CAPACITY: usize = 1 << 16;

/// Create a queue holding at most `capacity` reports, clamped to `1..=MAX_CAPACITY`.
pub fn channel(capacity: usize) -> (ReportProducer, ReportConsumer) {
    let requested = capacity;
    let capacity = capacity.clamp(1, MAX_CAPACITY);
    if capacity != requested {
        warn!("Report queue capacity {} clamped to {}", requested, capacity);
    }
    let (sender, receiver) = mpsc::channel(capacity);
    let counters = Arc::new(Counters::default());
    (
        ReportProducer {
            sender,
            capacity,
            counters: counters.clone(),
        },
        ReportConsumer { receiver, counters },
    )
}

pub struct ReportProducer {
    sender: mpsc::Sender<InputReport>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl ReportProducer {
    /// Append a report at the tail without blocking.
    pub fn enqueue(&self, report: InputReport) -> Result<(), QueueError> {
        self.counters.depth.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(report) {
            Ok(()) => {
                trace!("Report enqueued");
                Ok(())
            }
            Err(e) => {
                self.counters.depth.fetch_sub(1, Ordering::AcqRel);
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            "Report queue full ({} queued), dropping report ({} dropped so far)",
                            self.capacity, dropped
                        );
                        Err(QueueError::Full(self.capacity))
                    }
                    mpsc::error::TrySendError::Closed(_) => Err(QueueError::Closed),
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.counters.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

pub struct ReportConsumer {
    receiver: mpsc::Receiver<InputReport>,
    counters: Arc<Counters>,
}

impl ReportConsumer {
    /// Take the head report if one is queued.
    pub fn dequeue(&mut self) -> Option<InputReport> {
        match self.receiver.try_recv() {
            Ok(report) => {
                self.counters.depth.fetch_sub(1, Ordering::AcqRel);
                Some(report)
            }
            Err(_) => None,
        }
    }

    /// Block the calling thread until a report is available.
    ///
    /// Returns `None` once the producer is gone and the queue is drained.
    /// Must not be called from inside an async context.
    pub fn recv_blocking(&mut self) -> Option<InputReport> {
        let report = self.receiver.blocking_recv()?;
        self.counters.depth.fetch_sub(1, Ordering::AcqRel);
        Some(report)
    }

    pub fn len(&self) -> usize {
        self.counters.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}
