use chrono::NaiveDate;

use crate::{
    codec::{date_to_days, CodecError, RowBinaryWriter},
    driver::TaggedEncoder,
    tags::TaggedPath,
};

const COLUMN_COUNT: u64 = 5;

#[derive(Debug)]
struct StagedMetric {
    days: u16,
    path: String,
    tags: Vec<String>,
    version: u32,
}

/// Columnar body in the ClickHouse `Native` format: a single block holding
/// every staged row.
///
/// Rows are expanded per column only in [`TaggedEncoder::finish`], so each
/// metric is kept once however many tags it has.
#[derive(Debug, Default)]
pub struct NativeEncoder {
    metrics: Vec<StagedMetric>,
    rows: usize,
    body: Vec<u8>,
}

/// Every row as `(metric, tag1)`.
fn fan_out(metrics: &[StagedMetric]) -> impl Iterator<Item = (&StagedMetric, &str)> {
    metrics
        .iter()
        .flat_map(|m| m.tags.iter().map(move |tag| (m, tag.as_str())))
}

fn write_column_header<W: std::io::Write>(
    wtr: &mut RowBinaryWriter<W>,
    name: &str,
    ty: &str,
) -> Result<(), CodecError> {
    wtr.write_string(name)?;
    wtr.write_string(ty)
}

fn write_block(
    wtr: &mut RowBinaryWriter<&mut Vec<u8>>,
    metrics: &[StagedMetric],
    rows: usize,
) -> Result<(), CodecError> {
    wtr.write_uvarint(COLUMN_COUNT)?;
    wtr.write_uvarint(rows as u64)?;

    write_column_header(wtr, "Date", "Date")?;
    for (m, _) in fan_out(metrics) {
        wtr.write_u16(m.days)?;
    }

    write_column_header(wtr, "Tag1", "String")?;
    for (_, tag1) in fan_out(metrics) {
        wtr.write_string(tag1)?;
    }

    write_column_header(wtr, "Path", "String")?;
    for (m, _) in fan_out(metrics) {
        wtr.write_string(&m.path)?;
    }

    // arrays are cumulative end offsets followed by the flattened values
    write_column_header(wtr, "Tags", "Array(String)")?;
    let mut offset = 0u64;
    for (m, _) in fan_out(metrics) {
        offset += m.tags.len() as u64;
        wtr.write_u64(offset)?;
    }
    for (m, _) in fan_out(metrics) {
        for tag in &m.tags {
            wtr.write_string(tag)?;
        }
    }

    write_column_header(wtr, "Version", "UInt32")?;
    for (m, _) in fan_out(metrics) {
        wtr.write_u32(m.version)?;
    }
    Ok(())
}

impl TaggedEncoder for NativeEncoder {
    const FORMAT: &'static str = "Native";

    fn reset(&mut self) {
        self.metrics.clear();
        self.rows = 0;
        self.body.clear();
    }

    fn push_metric(
        &mut self,
        date: NaiveDate,
        tagged: &TaggedPath,
        version: u32,
    ) -> Result<usize, CodecError> {
        let days = date_to_days(date)?;
        self.metrics.push(StagedMetric {
            days,
            path: tagged.path.clone(),
            tags: tagged.tags.clone(),
            version,
        });
        self.rows += tagged.tags.len();
        Ok(tagged.tags.len())
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn finish(&mut self) -> Result<&[u8], CodecError> {
        self.body.clear();
        let mut wtr = RowBinaryWriter::new(&mut self.body);
        write_block(&mut wtr, &self.metrics, self.rows)?;
        Ok(self.body.as_slice())
    }
}
