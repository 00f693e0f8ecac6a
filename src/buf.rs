use std::io::{self, Read};

use chrono::NaiveDate;

use crate::{
    codec::{days_to_date, CodecError, SIZE_U16, SIZE_U32, SIZE_U64, SIZE_U8},
    varint::{decode_uvarint, VarintError, MAX_VARINT_LEN},
};

pub const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Buffered RowBinary decoder.
///
/// Unread bytes live in `buf[start..end]`. A read that cannot be served from
/// the window pulls from the source once; if that still comes up short the
/// read fails with [`CodecError::EndOfStream`] and the window keeps what was
/// pulled, so a source that later produces more bytes can be read again.
#[derive(Debug)]
pub struct RowBinaryReader<R> {
    rdr: R,
    buf: Vec<u8>,
    start: usize,
    end: usize,
}
impl<R: Read> RowBinaryReader<R> {
    pub fn new(rdr: R) -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE, rdr)
    }
    pub fn with_capacity(capacity: usize, rdr: R) -> Self {
        let buf = vec![0; capacity.max(SIZE_U64)];
        Self {
            rdr,
            buf,
            start: 0,
            end: 0,
        }
    }

    /// Unread bytes currently held in the window.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
    pub fn into_inner(self) -> R {
        self.rdr
    }

    /// Makes room for `want` bytes counted from `start`.
    fn reserve(&mut self, want: usize) {
        if self.start + want <= self.buf.len() {
            return;
        }
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if want > self.buf.len() {
            self.buf.resize(want, 0);
        }
    }

    fn fill(&mut self) -> Result<usize, CodecError> {
        loop {
            match self.rdr.read(&mut self.buf[self.end..]) {
                Ok(n) => {
                    self.end += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn consume(&mut self, n: usize) -> &[u8] {
        let start = self.start;
        self.start += n;
        &self.buf[start..self.start]
    }

    /// Returns the next `n` bytes.
    pub fn read_fixed(&mut self, n: usize) -> Result<&[u8], CodecError> {
        if self.end - self.start >= n {
            return Ok(self.consume(n));
        }
        self.reserve(n);
        self.fill()?;
        if self.end - self.start < n {
            return Err(CodecError::EndOfStream);
        }
        Ok(self.consume(n))
    }

    pub fn read_uvarint(&mut self) -> Result<u64, CodecError> {
        match decode_uvarint(self.buffered()) {
            Ok((value, n)) => {
                self.start += n;
                return Ok(value);
            }
            Err(VarintError::Incomplete) => {}
            Err(e) => return Err(e.into()),
        }
        self.reserve(MAX_VARINT_LEN);
        self.fill()?;
        let (value, n) = decode_uvarint(self.buffered())?;
        self.start += n;
        Ok(value)
    }

    /// True once the window is empty and the source yields no more bytes.
    pub fn is_exhausted(&mut self) -> Result<bool, CodecError> {
        if self.start < self.end {
            return Ok(false);
        }
        self.reserve(1);
        Ok(self.fill()? == 0)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_fixed(SIZE_U8)?[0])
    }
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let mut bytes = [0; SIZE_U16];
        bytes.copy_from_slice(self.read_fixed(SIZE_U16)?);
        Ok(u16::from_le_bytes(bytes))
    }
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut bytes = [0; SIZE_U32];
        bytes.copy_from_slice(self.read_fixed(SIZE_U32)?);
        Ok(u32::from_le_bytes(bytes))
    }
    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut bytes = [0; SIZE_U64];
        bytes.copy_from_slice(self.read_fixed(SIZE_U64)?);
        Ok(u64::from_le_bytes(bytes))
    }
    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.read_u64()?))
    }
    pub fn read_date(&mut self) -> Result<NaiveDate, CodecError> {
        Ok(days_to_date(self.read_u16()?))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_uvarint()?;
        if len == 0 {
            return Ok(vec![]);
        }
        let len = usize::try_from(len).map_err(|_| CodecError::LengthOverflow(len))?;
        Ok(self.read_fixed(len)?.to_vec())
    }
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        Ok(String::from_utf8(self.read_bytes()?)?)
    }
    pub fn read_string_list(&mut self) -> Result<Vec<String>, CodecError> {
        let count = self.read_uvarint()?;
        if count == 0 {
            return Ok(vec![]);
        }
        let count = usize::try_from(count).map_err(|_| CodecError::LengthOverflow(count))?;
        // the count comes off the wire, so do not trust it for preallocation
        let mut list = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            list.push(self.read_string()?);
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::codec::RowBinaryWriter;

    /// Hands out pre-arranged chunks, one per `read` call; an empty queue
    /// reads as end of stream until more chunks are pushed.
    #[derive(Debug, Default)]
    struct ChunkedSource {
        chunks: VecDeque<Vec<u8>>,
    }
    impl ChunkedSource {
        fn push(&mut self, chunk: &[u8]) {
            self.chunks.push_back(chunk.to_vec());
        }
    }
    impl Read for ChunkedSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                chunk.drain(..n);
                self.chunks.push_front(chunk);
            }
            Ok(n)
        }
    }

    struct FailingSource;
    impl Read for FailingSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn short_read_is_end_of_stream() {
        let mut src = ChunkedSource::default();
        src.push(&[0x01, 0x02]);
        let mut r = RowBinaryReader::with_capacity(8, src);

        assert!(matches!(r.read_u32(), Err(CodecError::EndOfStream)));
        assert_eq!(r.buffered(), &[0x01, 0x02]);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn window_survives_a_short_read() {
        let mut r = RowBinaryReader::with_capacity(8, ChunkedSource::default());
        r.rdr.push(&[0xaa, 0x01, 0x02]);
        assert_eq!(r.read_u8().unwrap(), 0xaa);
        assert!(matches!(r.read_u32(), Err(CodecError::EndOfStream)));
        r.rdr.push(&[0x03, 0x04]);
        assert_eq!(r.read_u32().unwrap(), 0x04030201);
        assert!(matches!(r.read_u8(), Err(CodecError::EndOfStream)));
    }

    #[test]
    fn buffer_grows_for_large_strings() {
        let long = "x".repeat(100);
        let mut w = RowBinaryWriter::new(vec![]);
        w.write_string(&long).unwrap();
        w.write_u8(7).unwrap();

        let mut r = RowBinaryReader::with_capacity(8, io::Cursor::new(w.into_inner()));
        assert_eq!(r.capacity(), 8);
        assert_eq!(r.read_string().unwrap(), long);
        assert!(r.capacity() >= 100);
        assert_eq!(r.read_u8().unwrap(), 7);
    }

    #[test]
    fn window_slides_to_front_before_growing() {
        let mut r = RowBinaryReader::with_capacity(8, ChunkedSource::default());
        r.rdr.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(r.read_u32().unwrap(), u32::from_le_bytes([1, 2, 3, 4]));
        assert_eq!(r.read_u8().unwrap(), 5);
        r.rdr.push(&[9, 10, 11, 12]);
        // start = 5, end = 8: four bytes fit after sliding, no growth
        assert_eq!(r.read_u32().unwrap(), u32::from_le_bytes([6, 7, 8, 9]));
        assert_eq!(r.capacity(), 8);
        assert_eq!(r.buffered(), &[10, 11, 12]);
    }

    #[test]
    fn varint_split_across_reads() {
        let mut src = ChunkedSource::default();
        src.push(&[0xac]);
        src.push(&[0x02, 0x2a]);
        let mut r = RowBinaryReader::with_capacity(8, src);
        // the first pull fills only 0xac; decode resumes after a second pull
        assert!(matches!(r.read_uvarint(), Err(CodecError::EndOfStream)));
        assert_eq!(r.read_uvarint().unwrap(), 300);
        assert_eq!(r.read_u8().unwrap(), 0x2a);
    }

    #[test]
    fn long_varint_resumes_after_growth() {
        let mut src = ChunkedSource::default();
        src.push(&[0xff; 9]);
        src.push(&[0x01]);
        let mut r = RowBinaryReader::with_capacity(8, src);
        assert_eq!(r.read_u8().unwrap(), 0xff);
        // seven continuation bytes buffered, the pull only adds one more
        assert!(matches!(r.read_uvarint(), Err(CodecError::EndOfStream)));
        assert_eq!(r.buffered().len(), 8);
        assert!(r.capacity() >= MAX_VARINT_LEN);
        assert_eq!(r.read_uvarint().unwrap(), (1u64 << 57) - 1);
        assert!(r.is_exhausted().unwrap());
    }

    #[test]
    fn varint_overflow_is_reported() {
        let mut input = vec![0xff; 9];
        input.push(0x7f);
        let mut r = RowBinaryReader::new(io::Cursor::new(input));
        assert!(matches!(r.read_uvarint(), Err(CodecError::Overflow)));
    }

    #[test]
    fn empty_string_and_list_need_no_payload() {
        let mut r = RowBinaryReader::new(io::Cursor::new(vec![0x00, 0x00]));
        assert_eq!(r.read_string().unwrap(), "");
        assert!(r.read_string_list().unwrap().is_empty());
        assert!(r.is_exhausted().unwrap());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut r = RowBinaryReader::new(io::Cursor::new(vec![0x02, 0xc3, 0x28]));
        assert!(matches!(r.read_string(), Err(CodecError::InvalidUtf8(_))));
    }

    #[test]
    fn source_errors_propagate() {
        let mut r = RowBinaryReader::new(FailingSource);
        assert!(matches!(r.read_u8(), Err(CodecError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset));
    }
}
