pub mod buf;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod driver;
pub mod exporter;
pub mod tags;
pub mod varint;

use chrono::NaiveDate;

/// A metric path to be indexed for `date`.
///
/// An empty path carries no data; it asks the driver to flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    pub path: String,
    pub date: NaiveDate,
}
impl MetricRecord {
    pub fn new(path: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            path: path.into(),
            date,
        }
    }
    pub fn flush_marker() -> Self {
        Self {
            path: String::new(),
            date: NaiveDate::default(),
        }
    }

    pub fn is_flush_marker(&self) -> bool {
        self.path.is_empty()
    }
    pub fn is_tagged(&self) -> bool {
        self.path.contains(tags::TAG_SEPARATOR)
    }
}
