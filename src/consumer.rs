use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    driver::{Driver, FlushError, Flushed},
    MetricRecord,
};

pub const QUEUE_CAPACITY: usize = 100;

/// Totals reported by the consumer once it has stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Source records transmitted.
    pub records: usize,
    /// Table rows transmitted.
    pub rows: usize,
    /// Records skipped as malformed.
    pub rejected: usize,
    /// Records lost to a failed flush on their way into a batch.
    pub dropped: usize,
    pub failed_flushes: usize,
}
impl ConsumerStats {
    fn record(&mut self, result: Result<Flushed, FlushError>) {
        match result {
            Ok(flushed) => {
                self.records += flushed.records;
                self.rows += flushed.rows;
                self.rejected += flushed.rejected.len();
                if flushed.records > 0 {
                    info!(
                        elapsed = ?flushed.elapsed,
                        records = flushed.records,
                        rows = flushed.rows,
                        "Flushed tagged metrics."
                    );
                }
            }
            Err(e) => {
                self.failed_flushes += 1;
                error!(elapsed = ?e.elapsed, records = e.records, error = %e.cause, "Flush failed.");
                if let Some(record) = e.dropped {
                    self.dropped += 1;
                    error!(metric = %record.path, date = %record.date, "Dropped metric after failed flush.");
                }
            }
        }
    }
}

fn consume(
    mut driver: Box<dyn Driver>,
    mut rx: mpsc::Receiver<MetricRecord>,
    shutdown: CancellationToken,
) -> ConsumerStats {
    let mut stats = ConsumerStats::default();
    loop {
        if shutdown.is_cancelled() {
            info!(queued = rx.len(), "Interrupted, discarding queued metrics.");
            break;
        }
        let Some(record) = rx.blocking_recv() else {
            break;
        };
        stats.record(driver.write(record));
    }

    stats.record(driver.flush());
    if let Err(e) = driver.close() {
        warn!(error = %e, "Failed to close driver.");
    }
    stats
}

/// Routes tagged records to the consumer of the tagged index table.
///
/// One blocking task owns the [`Driver`] and feeds it every record in queue
/// order, so at most one insert is in flight. A full queue blocks producers.
#[derive(Debug)]
pub struct IndexStore {
    tagged_tx: Option<mpsc::Sender<MetricRecord>>,
    consumer: Option<JoinHandle<ConsumerStats>>,
}
impl IndexStore {
    /// Starts the consumer. Cancelling `shutdown` makes it stop before the
    /// next dequeue, flushing only what it has already accumulated.
    pub fn new(tagged: Option<Box<dyn Driver>>, shutdown: CancellationToken) -> Self {
        Self::with_capacity(tagged, shutdown, QUEUE_CAPACITY)
    }
    pub fn with_capacity(
        tagged: Option<Box<dyn Driver>>,
        shutdown: CancellationToken,
        capacity: usize,
    ) -> Self {
        let Some(driver) = tagged else {
            return Self {
                tagged_tx: None,
                consumer: None,
            };
        };
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let consumer = tokio::task::spawn_blocking(move || consume(driver, rx, shutdown));
        Self {
            tagged_tx: Some(tx),
            consumer: Some(consumer),
        }
    }

    /// Queues a tagged record or a flush marker, waiting while the queue is
    /// full. Anything else is dropped. Returns whether the record was queued.
    pub async fn push(&self, record: MetricRecord) -> bool {
        if !record.is_tagged() && !record.is_flush_marker() {
            // TODO: plain metrics need their own driver and table
            return false;
        }
        let Some(tx) = &self.tagged_tx else {
            return false;
        };
        if tx.send(record).await.is_err() {
            debug!("Consumer has stopped, dropping metric.");
            return false;
        }
        true
    }

    /// Queues a flush marker.
    pub async fn flush_init(&self) -> bool {
        self.push(MetricRecord::flush_marker()).await
    }

    /// Stops on cancellation: closes the queue and waits until everything
    /// already queued has been written and flushed.
    pub async fn interrupt(self) -> ConsumerStats {
        info!("Interrupting ingestion.");
        self.shutdown().await
    }

    /// Stops at end of input: closes the queue and waits until everything
    /// already queued has been written and flushed.
    pub async fn stop(self) -> ConsumerStats {
        self.shutdown().await
    }

    async fn shutdown(mut self) -> ConsumerStats {
        drop(self.tagged_tx.take());
        let Some(consumer) = self.consumer.take() else {
            return ConsumerStats::default();
        };
        match consumer.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Consumer task failed.");
                ConsumerStats {
                    failed_flushes: 1,
                    ..Default::default()
                }
            }
        }
    }
}
