use std::io::{self, Read, Write};

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

use crate::{
    buf::RowBinaryReader,
    varint::{encode_uvarint, VarintError, MAX_VARINT_LEN},
};

pub const SIZE_U8: usize = 1;
pub const SIZE_U16: usize = 2;
pub const SIZE_U32: usize = 4;
pub const SIZE_U64: usize = 8;

/// Null marker for nullable `UInt32` columns.
pub const NULL_U32: u32 = u32::MAX;

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

#[derive(Debug, Error)]
pub enum CodecError {
    /// Not enough bytes for a complete value; more input may resolve it.
    #[error("unexpected end of stream")]
    EndOfStream,
    #[error("varint overflows a 64-bit integer")]
    Overflow,
    #[error("string is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("length {0} does not fit in memory")]
    LengthOverflow(u64),
    #[error("date {0} is outside the UInt16 day range")]
    DateOutOfRange(NaiveDate),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<VarintError> for CodecError {
    fn from(e: VarintError) -> Self {
        match e {
            VarintError::Incomplete => Self::EndOfStream,
            VarintError::Overflow => Self::Overflow,
        }
    }
}

pub fn date_to_days(date: NaiveDate) -> Result<u16, CodecError> {
    let days = date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE;
    u16::try_from(days).map_err(|_| CodecError::DateOutOfRange(date))
}

pub fn days_to_date(days: u16) -> NaiveDate {
    // every u16 day count lands before 2150
    NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_DAYS_FROM_CE + i32::from(days))
        .unwrap_or_default()
}

#[derive(Debug)]
pub struct RowBinaryWriter<W> {
    wtr: W,
    scratch: [u8; MAX_VARINT_LEN],
}
impl<W: Write> RowBinaryWriter<W> {
    pub fn new(wtr: W) -> Self {
        Self {
            wtr,
            scratch: [0; MAX_VARINT_LEN],
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.wtr
    }
    pub fn into_inner(self) -> W {
        self.wtr
    }

    pub fn write_raw(&mut self, buf: &[u8]) -> Result<(), CodecError> {
        self.wtr.write_all(buf)?;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.write_raw(&[value])
    }
    pub fn write_u16(&mut self, value: u16) -> Result<(), CodecError> {
        self.write_raw(&value.to_le_bytes())
    }
    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.write_raw(&value.to_le_bytes())
    }
    pub fn write_u64(&mut self, value: u64) -> Result<(), CodecError> {
        self.write_raw(&value.to_le_bytes())
    }
    pub fn write_f64(&mut self, value: f64) -> Result<(), CodecError> {
        self.write_u64(value.to_bits())
    }

    /// `NULL_U32` is written as null.
    pub fn write_nullable_u32(&mut self, value: u32) -> Result<(), CodecError> {
        if value == NULL_U32 {
            return self.write_u8(1);
        }
        self.write_u8(0)?;
        self.write_u32(value)
    }
    /// NaN is written as null.
    pub fn write_nullable_f64(&mut self, value: f64) -> Result<(), CodecError> {
        if value.is_nan() {
            return self.write_u8(1);
        }
        self.write_u8(0)?;
        self.write_f64(value)
    }

    /// Days since the Unix epoch as `UInt16`. Dates past 2149-06-06 or before
    /// the epoch are rejected rather than wrapped.
    pub fn write_date(&mut self, date: NaiveDate) -> Result<(), CodecError> {
        self.write_u16(date_to_days(date)?)
    }

    pub fn write_uvarint(&mut self, value: u64) -> Result<(), CodecError> {
        let encoded = encode_uvarint(value, &mut self.scratch);
        self.wtr.write_all(encoded)?;
        Ok(())
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<(), CodecError> {
        self.write_uvarint(value.len() as u64)?;
        self.write_raw(value)
    }
    pub fn write_string(&mut self, value: &str) -> Result<(), CodecError> {
        self.write_bytes(value.as_bytes())
    }
    pub fn write_string_list<S: AsRef<str>>(&mut self, values: &[S]) -> Result<(), CodecError> {
        self.write_uvarint(values.len() as u64)?;
        for value in values {
            self.write_string(value.as_ref())?;
        }
        Ok(())
    }

    pub fn write_u32_list(&mut self, values: &[u32]) -> Result<(), CodecError> {
        self.write_uvarint(values.len() as u64)?;
        for &value in values {
            self.write_u32(value)?;
        }
        Ok(())
    }
    pub fn write_nullable_u32_list(&mut self, values: &[u32]) -> Result<(), CodecError> {
        self.write_uvarint(values.len() as u64)?;
        for &value in values {
            self.write_nullable_u32(value)?;
        }
        Ok(())
    }
    pub fn write_f64_list(&mut self, values: &[f64]) -> Result<(), CodecError> {
        self.write_uvarint(values.len() as u64)?;
        for &value in values {
            self.write_f64(value)?;
        }
        Ok(())
    }
    pub fn write_nullable_f64_list(&mut self, values: &[f64]) -> Result<(), CodecError> {
        self.write_uvarint(values.len() as u64)?;
        for &value in values {
            self.write_nullable_f64(value)?;
        }
        Ok(())
    }
}

/// One row of the tagged index table: `Date, Tag1, Path, Tags, Version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedRow {
    pub date: NaiveDate,
    pub tag1: String,
    pub path: String,
    pub tags: Vec<String>,
    pub version: u32,
}
impl TaggedRow {
    pub fn write_to<W: Write>(&self, wtr: &mut RowBinaryWriter<W>) -> Result<(), CodecError> {
        wtr.write_date(self.date)?;
        wtr.write_string(&self.tag1)?;
        wtr.write_string(&self.path)?;
        wtr.write_string_list(&self.tags)?;
        wtr.write_u32(self.version)
    }

    pub fn read_from<R: Read>(rdr: &mut RowBinaryReader<R>) -> Result<Self, CodecError> {
        let date = rdr.read_date()?;
        let tag1 = rdr.read_string()?;
        let path = rdr.read_string()?;
        let tags = rdr.read_string_list()?;
        let version = rdr.read_u32()?;
        Ok(Self {
            date,
            tag1,
            path,
            tags,
            version,
        })
    }
}

/// Reads rows until the stream ends cleanly on a row boundary.
pub fn read_tagged_rows<R: Read>(rdr: &mut RowBinaryReader<R>) -> Result<Vec<TaggedRow>, CodecError> {
    let mut rows = vec![];
    while !rdr.is_exhausted()? {
        rows.push(TaggedRow::read_from(rdr)?);
    }
    Ok(rows)
}
