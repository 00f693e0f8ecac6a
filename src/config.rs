use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{
    driver::{native::NativeEncoder, rowbin::RowBinaryEncoder, Driver, TaggedDriver},
    exporter::{HttpTransport, DEFAULT_TIMEOUT},
};

/// Initial body buffer for row-wise inserts.
const ROWBIN_BODY_CAPACITY: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid size '{0}'")]
    InvalidSize(String),
    #[error("invalid clickhouse driver '{0}', expected one of {}", DriverKind::NAMES.join(", "))]
    UnknownDriver(String),
}

/// A byte count written as `512`, `64k`, `1M` or `2g` (powers of 1024).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Size(pub u64);
impl Size {
    pub fn bytes(self) -> u64 {
        self.0
    }
}
impl FromStr for Size {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidSize(s.to_owned());
        let lower = s.trim().to_ascii_lowercase();
        let (digits, scale) = match lower.as_bytes().last() {
            Some(b'k') => (&lower[..lower.len() - 1], 1 << 10),
            Some(b'm') => (&lower[..lower.len() - 1], 1 << 20),
            Some(b'g') => (&lower[..lower.len() - 1], 1 << 30),
            Some(_) => (lower.as_str(), 1),
            None => return Err(invalid()),
        };
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        n.checked_mul(scale).map(Size).ok_or_else(invalid)
    }
}
impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    /// Row-wise `RowBinary` over HTTP.
    #[default]
    RowBinary,
    /// Columnar `Native` blocks over HTTP.
    Native,
}
impl DriverKind {
    pub const NAMES: [&'static str; 2] = ["rowbin", "native"];
}
impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rowbin" | "rowbinary" => Ok(Self::RowBinary),
            "native" => Ok(Self::Native),
            _ => Err(ConfigError::UnknownDriver(s.to_owned())),
        }
    }
}
impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RowBinary => Self::NAMES[0],
            Self::Native => Self::NAMES[1],
        };
        f.write_str(name)
    }
}

/// Everything needed to reach the tagged index table.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub kind: DriverKind,
    pub address: String,
    pub table: String,
    pub flush_size: Size,
    pub timeout: Duration,
}
impl DriverConfig {
    pub fn new(kind: DriverKind, address: String, table: String) -> Self {
        Self {
            kind,
            address,
            table,
            flush_size: Size(1 << 20),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `None` when no table is configured.
    pub fn build(&self) -> Option<Box<dyn Driver>> {
        if self.table.is_empty() {
            return None;
        }
        let transport = HttpTransport::new(self.address.clone(), self.table.clone(), self.timeout);
        let flush_size = usize::try_from(self.flush_size.bytes())
            .unwrap_or(usize::MAX)
            .max(1);
        let driver: Box<dyn Driver> = match self.kind {
            DriverKind::RowBinary => Box::new(TaggedDriver::new(
                RowBinaryEncoder::with_capacity(ROWBIN_BODY_CAPACITY),
                transport,
                flush_size,
            )),
            DriverKind::Native => Box::new(TaggedDriver::new(
                NativeEncoder::default(),
                transport,
                flush_size,
            )),
        };
        Some(driver)
    }
}
