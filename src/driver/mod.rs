use std::time::{Duration, Instant};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

use crate::{
    codec::CodecError,
    exporter::Transport,
    tags::{parse_tagged, TagError, TaggedPath},
    MetricRecord,
};

pub mod native;
pub mod rowbin;

/// Pre-allocating more records than this gains nothing.
const MAX_PREALLOCATED_RECORDS: usize = 64 * 1024;

/// Accumulates records until their total path length reaches the flush
/// threshold, then sends every pending record as one insert of one row per
/// tag.
pub trait Driver: Send {
    /// Buffers `record`, flushing first if the threshold has been reached.
    ///
    /// A flush marker flushes unconditionally. On a failed threshold flush the
    /// record is not buffered and comes back in [`FlushError::dropped`].
    fn write(&mut self, record: MetricRecord) -> Result<Flushed, FlushError>;
    /// Transmits every pending record. The batch is kept on failure.
    fn flush(&mut self) -> Result<Flushed, FlushError>;
    /// Bytes of metric paths waiting for a flush.
    fn queued(&self) -> usize;
    /// Does not flush.
    fn close(&mut self) -> anyhow::Result<()>;
}

/// Outcome of a successful write or flush.
#[derive(Debug, Default)]
pub struct Flushed {
    pub elapsed: Duration,
    /// Source records transmitted.
    pub records: usize,
    /// Table rows transmitted, one per tag.
    pub rows: usize,
    pub rejected: Vec<Rejected>,
}
impl Flushed {
    fn absorb(&mut self, other: Flushed) {
        self.elapsed += other.elapsed;
        self.records += other.records;
        self.rows += other.rows;
        self.rejected.extend(other.rejected);
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Tags(#[from] TagError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A record skipped during a flush.
#[derive(Debug)]
pub struct Rejected {
    pub metric: String,
    pub error: RecordError,
}

#[derive(Debug, Error)]
#[error("flush failed after {elapsed:?} with {records} records staged: {cause:#}")]
pub struct FlushError {
    pub elapsed: Duration,
    /// Records staged but not committed.
    pub records: usize,
    /// The record given to a write whose threshold flush failed.
    pub dropped: Option<MetricRecord>,
    pub cause: anyhow::Error,
}

/// Pending records and their total path length.
#[derive(Debug, Default)]
pub struct Batch {
    records: Vec<MetricRecord>,
    size: usize,
}
impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            size: 0,
        }
    }

    pub fn push(&mut self, record: MetricRecord) {
        self.size += record.path.len();
        self.records.push(record);
    }
    pub fn clear(&mut self) {
        self.records.clear();
        self.size = 0;
    }

    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Turns parsed metrics into the body of one insert.
pub trait TaggedEncoder: Send {
    /// ClickHouse input format of the body.
    const FORMAT: &'static str;

    fn reset(&mut self);
    /// Stages one row per tag and returns the row count. Nothing is staged
    /// on error.
    fn push_metric(
        &mut self,
        date: NaiveDate,
        tagged: &TaggedPath,
        version: u32,
    ) -> Result<usize, CodecError>;
    fn rows(&self) -> usize;
    fn finish(&mut self) -> Result<&[u8], CodecError>;
}

#[derive(Debug)]
pub struct TaggedDriver<E, T> {
    encoder: E,
    transport: T,
    flush_size: usize,
    batch: Batch,
    closed: bool,
}
impl<E: TaggedEncoder, T: Transport> TaggedDriver<E, T> {
    pub fn new(encoder: E, transport: T, flush_size: usize) -> Self {
        // some heuristic: flush size / average metric length
        let capacity = (flush_size / 100).min(MAX_PREALLOCATED_RECORDS);
        Self {
            encoder,
            transport,
            flush_size,
            batch: Batch::with_capacity(capacity),
            closed: false,
        }
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn stage(&mut self, version: u32) -> Flushed {
        let mut flushed = Flushed::default();
        self.encoder.reset();
        for record in self.batch.records() {
            let staged = parse_tagged(&record.path)
                .map_err(RecordError::from)
                .and_then(|tagged| {
                    self.encoder
                        .push_metric(record.date, &tagged, version)
                        .map_err(RecordError::from)
                });
            match staged {
                Ok(rows) => {
                    flushed.records += 1;
                    flushed.rows += rows;
                }
                Err(error) => {
                    warn!(metric = %record.path, %error, "Invalid metric.");
                    flushed.rejected.push(Rejected {
                        metric: record.path.clone(),
                        error,
                    });
                }
            }
        }
        flushed
    }
}

impl<E: TaggedEncoder, T: Transport> Driver for TaggedDriver<E, T> {
    fn write(&mut self, record: MetricRecord) -> Result<Flushed, FlushError> {
        let mut flushed = Flushed::default();
        if self.batch.size() >= self.flush_size {
            flushed = match self.flush() {
                Ok(flushed) => flushed,
                Err(mut e) => {
                    if !record.is_flush_marker() {
                        e.dropped = Some(record);
                    }
                    return Err(e);
                }
            };
        }
        if record.is_flush_marker() {
            flushed.absorb(self.flush()?);
        } else {
            self.batch.push(record);
        }
        Ok(flushed)
    }

    fn flush(&mut self) -> Result<Flushed, FlushError> {
        let start = Instant::now();
        if self.batch.is_empty() {
            return Ok(Flushed::default());
        }
        let version = chrono::Utc::now().timestamp() as u32;
        let mut flushed = self.stage(version);

        if self.encoder.rows() > 0 {
            let sent = match self.encoder.finish() {
                Ok(body) => self.transport.send(E::FORMAT, body),
                Err(e) => Err(e.into()),
            };
            if let Err(cause) = sent {
                return Err(FlushError {
                    elapsed: start.elapsed(),
                    records: flushed.records,
                    dropped: None,
                    cause,
                });
            }
        }

        self.batch.clear();
        flushed.elapsed = start.elapsed();
        Ok(flushed)
    }

    fn queued(&self) -> usize {
        self.batch.size()
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()
    }
}
