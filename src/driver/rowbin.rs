use chrono::NaiveDate;

use crate::{
    codec::{date_to_days, CodecError, RowBinaryWriter},
    driver::TaggedEncoder,
    tags::TaggedPath,
};

/// Row-wise `RowBinary` body.
#[derive(Debug, Default)]
pub struct RowBinaryEncoder {
    body: Vec<u8>,
    tags: Vec<u8>,
    rows: usize,
}
impl RowBinaryEncoder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            body: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }
}

fn write_rows(
    wtr: &mut RowBinaryWriter<&mut Vec<u8>>,
    days: u16,
    tagged: &TaggedPath,
    encoded_tags: &[u8],
    version: u32,
) -> Result<(), CodecError> {
    // Date, Tag1, Path, Tags, Version
    for tag1 in &tagged.tags {
        wtr.write_u16(days)?;
        wtr.write_string(tag1)?;
        wtr.write_string(&tagged.path)?;
        wtr.write_raw(encoded_tags)?;
        wtr.write_u32(version)?;
    }
    Ok(())
}

impl TaggedEncoder for RowBinaryEncoder {
    const FORMAT: &'static str = "RowBinary";

    fn reset(&mut self) {
        self.body.clear();
        self.rows = 0;
    }

    fn push_metric(
        &mut self,
        date: NaiveDate,
        tagged: &TaggedPath,
        version: u32,
    ) -> Result<usize, CodecError> {
        let days = date_to_days(date)?;

        // the tag list is identical in every row of the metric
        self.tags.clear();
        RowBinaryWriter::new(&mut self.tags).write_string_list(&tagged.tags)?;

        let mark = self.body.len();
        let mut wtr = RowBinaryWriter::new(&mut self.body);
        if let Err(e) = write_rows(&mut wtr, days, tagged, &self.tags, version) {
            self.body.truncate(mark);
            return Err(e);
        }
        self.rows += tagged.tags.len();
        Ok(tagged.tags.len())
    }

    fn rows(&self) -> usize {
        self.rows
    }

    fn finish(&mut self) -> Result<&[u8], CodecError> {
        Ok(self.body.as_slice())
    }
}
