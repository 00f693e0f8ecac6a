use thiserror::Error;

/// A `u64` never needs more than ten 7-bit groups.
pub const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintError {
    /// The input ended before a terminating byte; more bytes may complete it.
    #[error("incomplete varint")]
    Incomplete,
    #[error("varint overflows a 64-bit integer")]
    Overflow,
}

/// Decodes an unsigned LEB128 varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_uvarint(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN - 1 {
            // only one payload bit is left in the last group
            if byte > 1 {
                return Err(VarintError::Overflow);
            }
            return Ok((value | u64::from(byte) << 63, i + 1));
        }
        if byte < 0x80 {
            return Ok((value | u64::from(byte) << (7 * i), i + 1));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
    }
    Err(VarintError::Incomplete)
}

pub fn encode_uvarint(mut value: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> &[u8] {
    let mut n = 0;
    while value >= 0x80 {
        buf[n] = (value as u8) | 0x80;
        value >>= 7;
        n += 1;
    }
    buf[n] = value as u8;
    &buf[..=n]
}
