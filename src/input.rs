use std::{io, path::Path};

use async_compression::tokio::bufread::GzipDecoder;
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
};
use tracing::warn;

/// Lines of one metrics file. Lines that are not valid UTF-8 are logged and
/// skipped.
pub struct MetricLines {
    rdr: Box<dyn AsyncBufRead + Unpin + Send>,
    path: String,
    line_no: usize,
    skipped: usize,
    buf: Vec<u8>,
}
impl MetricLines {
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            self.buf.clear();
            if self.rdr.read_until(b'\n', &mut self.buf).await? == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if self.buf.last() == Some(&b'\n') {
                self.buf.pop();
            }
            match String::from_utf8(std::mem::take(&mut self.buf)) {
                Ok(line) => return Ok(Some(line)),
                Err(e) => {
                    warn!(
                        path = %self.path,
                        line = self.line_no,
                        metric = %String::from_utf8_lossy(e.as_bytes()),
                        "Skipping metric that is not valid UTF-8."
                    );
                    self.skipped += 1;
                    self.buf = e.into_bytes();
                }
            }
        }
    }

    /// Lines skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// Opens a metrics file for line-by-line reading, gunzipping `*.gz` files on
/// the fly. Concatenated gzip members are read back to back.
pub async fn open(path: &Path) -> io::Result<MetricLines> {
    let file = BufReader::new(File::open(path).await?);
    let rdr: Box<dyn AsyncBufRead + Unpin + Send> =
        if path.extension().is_some_and(|ext| ext == "gz") {
            let mut decoder = GzipDecoder::new(file);
            decoder.multiple_members(true);
            Box::new(BufReader::new(decoder))
        } else {
            Box::new(file)
        };
    Ok(MetricLines {
        rdr,
        path: path.display().to_string(),
        line_no: 0,
        skipped: 0,
        buf: Vec::new(),
    })
}
