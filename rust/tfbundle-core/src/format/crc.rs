// rust/tfbundle-core/src/format/crc.rs

//! CRC-32C with the LevelDB/TensorFlow masking transform.
//!
//! Checksums stored next to data that may itself contain checksums are
//! masked so that a CRC computed over a CRC does not degenerate.

const MASK_DELTA: u32 = 0xA282_EAD8;

/// Plain CRC-32C (Castagnoli) of `data`.
pub fn crc32c(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Extends `crc` with more bytes.
pub fn crc32c_extend(crc: u32, data: &[u8]) -> u32 {
    crc32c::crc32c_append(crc, data)
}

/// Applies the masking transform to a raw CRC.
pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask`].
pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

/// Masked CRC-32C of `data`, as stored in block trailers and bundle entries.
pub fn masked_crc32c(data: &[u8]) -> u32 {
    mask(crc32c(data))
}
