//! Unsigned LEB128 varints, as used for frame length prefixes.

use bytes::BufMut;

use crate::{constants::MAX_VARINT_LEN, error::ProtoError};

/// Append `value` to `out` as a varint.
pub fn encode_varint(mut value: u32, out: &mut impl BufMut) {
    while value >= 0x80 {
        out.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.put_u8(value as u8);
}

/// Number of bytes `encode_varint` writes for `value`.
pub const fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Decode a varint from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` ends inside the varint, and
/// `(value, bytes_read)` otherwise. A varint longer than
/// [`MAX_VARINT_LEN`] or overflowing `u32` is corrupt.
pub fn decode_varint(buf: &[u8]) -> Result<Option<(u32, usize)>, ProtoError> {
    let mut value = 0u32;
    for (i, &byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        let bits = u32::from(byte & 0x7F);
        // The fifth byte only has room for the top 4 bits of a u32.
        if i == MAX_VARINT_LEN - 1 && (bits > 0x0F || byte & 0x80 != 0) {
            return Err(ProtoError::CorruptLengthPrefix);
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}
