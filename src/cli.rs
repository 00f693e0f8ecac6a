use std::{path::PathBuf, time::Duration};

use chrono::NaiveDate;
use clap::Parser;
use metrics_loader::{
    config::{DriverConfig, DriverKind, Size},
    exporter::DEFAULT_ADDRESS,
};

/// Loads tagged metric paths into a ClickHouse graphite index table.
#[derive(Clone, Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// Metrics file, one path per line. Files ending in `.gz` are decompressed.
    #[arg(short, long = "file", required = true)]
    pub files: Vec<PathBuf>,

    /// ClickHouse driver [rowbin, native].
    #[arg(short, long, default_value = "rowbin")]
    pub driver: DriverKind,

    /// Flush a batch once its metric paths add up to this many bytes.
    #[arg(short, long, default_value = "1M")]
    pub size: Size,

    /// Graphite tagged table.
    #[arg(short, long, default_value = "")]
    pub tagged: String,

    /// ClickHouse HTTP address.
    #[arg(short, long, default_value = DEFAULT_ADDRESS)]
    pub address: String,

    /// Timeout of a single insert.
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Index date (YYYY-MM-DD). Every date is a separate pass over all files.
    /// Defaults to today.
    #[arg(long = "date")]
    pub dates: Vec<NaiveDate>,
}
impl Cli {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            flush_size: Size(self.size.bytes().max(1)),
            timeout: self.timeout,
            ..DriverConfig::new(self.driver, self.address.clone(), self.tagged.clone())
        }
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        if self.dates.is_empty() {
            vec![chrono::Local::now().date_naive()]
        } else {
            self.dates.clone()
        }
    }
}
