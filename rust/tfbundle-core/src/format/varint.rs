// rust/tfbundle-core/src/format/varint.rs

//! Little-endian base-128 varints and bounded slice reads.
//!
//! Every reader takes the buffer plus a cursor and advances the cursor past
//! the bytes it consumed, so records can be decoded field by field.

use crate::error::{BundleError, Result};

/// Longest legal encoding of a 64-bit value.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` to `buf` as a varint.
pub fn write_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Returns the varint encoding of `value` as a fresh buffer.
pub fn varint_bytes(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    write_varint(value, &mut buf);
    buf
}

/// Decodes a varint from `buf` starting at `*pos`.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let start = *pos;
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let Some(&byte) = buf.get(*pos) else {
            return Err(BundleError::truncated("varint", start, *pos - start + 1, buf.len().saturating_sub(start)));
        };
        *pos += 1;

        let payload = (byte & 0x7F) as u64;
        if shift >= 63 && payload > 1 {
            return Err(BundleError::MalformedVarint { offset: start });
        }
        result |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= (MAX_VARINT_LEN as u32) * 7 {
            return Err(BundleError::MalformedVarint { offset: start });
        }
    }
}

/// Decodes a varint that is used as a length or count within `buf`.
pub fn read_varint_usize(buf: &[u8], pos: &mut usize) -> Result<usize> {
    let start = *pos;
    let value = read_varint(buf, pos)?;
    usize::try_from(value).map_err(|_| BundleError::MalformedVarint { offset: start })
}

/// Returns the next `len` bytes of `buf` and advances the cursor.
pub fn read_slice<'a>(buf: &'a [u8], pos: &mut usize, len: usize, context: &'static str) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| BundleError::truncated(context, *pos, len, buf.len().saturating_sub(*pos)))?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Reads a little-endian `u32`.
pub fn read_u32_le(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = read_slice(buf, pos, 4, "fixed32")?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
