//! Processing loop
//!
//! Single consumer of the report queue: diff each report against the
//! controller state, then publish the changes that are wired to the output.

use crate::domain::controller::{ControllerState, TrackerError};
use crate::infrastructure::publisher::Publisher;
use crate::infrastructure::report_queue::ReportConsumer;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub reports: u64,
    pub changes: u64,
    pub published: u64,
    pub write_failures: u64,
}

/// Runs until the producer side of the queue is dropped.
///
/// Blocks the calling thread. An out-of-range dpad stops the loop with an error.
pub fn run_consumer(
    mut consumer: ReportConsumer,
    mut tracker: ControllerState,
    mut publisher: Publisher,
) -> Result<ConsumerStats, TrackerError> {
    let mut stats = ConsumerStats::default();
    info!("Report consumer started");

    while let Some(report) = consumer.recv_blocking() {
        stats.reports += 1;

        let changes = match tracker.update(&report) {
            Ok(changes) => changes,
            Err(e) => {
                error!("Corrupt report {:?}: {}", report.to_bytes(), e);
                let mut discarded = 0usize;
                while consumer.dequeue().is_some() {
                    discarded += 1;
                }
                error!("Stopping report consumer, {} queued reports discarded", discarded);
                return Err(e);
            }
        };
        stats.changes += changes.len() as u64;

        if !changes.is_empty() {
            debug!("Report #{}:\n{}", stats.reports, report);
        }
        if !consumer.is_empty() {
            trace!("{} reports waiting", consumer.len());
        }

        for change in changes.iter().filter(|c| c.publish) {
            match publisher.publish(change) {
                Ok(()) => stats.published += 1,
                Err(e) => {
                    stats.write_failures += 1;
                    warn!("{}", e);
                }
            }
        }
    }

    info!(
        "Report consumer stopped: {} reports, {} changes, {} lines published, {} dropped",
        stats.reports,
        stats.changes,
        stats.published,
        consumer.dropped()
    );
    debug!("Final state:\n{}", tracker);
    Ok(stats)
}
