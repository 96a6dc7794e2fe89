// rust/tfbundle-core/src/format/snappy.rs

//! Snappy block-format decompressor.
//!
//! Some TensorFlow index files store their blocks Snappy-compressed. Only
//! decoding is provided; the writer always emits uncompressed blocks.
//!
//! ## Stream layout
//!
//! ```text
//! +---------------------------+
//! | Uncompressed length       |  <- varint
//! +---------------------------+
//! | Tag byte + payload        |  <- repeated until the input is exhausted
//! | ...                       |
//! +---------------------------+
//! ```
//!
//! The low two bits of each tag select the element kind:
//!
//! | Bits | Element                                                     |
//! |------|-------------------------------------------------------------|
//! | `00` | Literal; length - 1 in the upper 6 bits, or 1-4 LE bytes    |
//! | `01` | Copy; length - 4 in 3 bits, 11-bit offset                   |
//! | `10` | Copy; length - 1 in 6 bits, 2-byte LE offset                |
//! | `11` | Copy; length - 1 in 6 bits, 4-byte LE offset                |

use tracing::warn;

use super::varint::{read_slice, read_varint_usize};
use crate::error::{BundleError, Result};

const TAG_LITERAL: u8 = 0b00;
const TAG_COPY_1: u8 = 0b01;
const TAG_COPY_2: u8 = 0b10;

/// Upper bound on preallocation; a corrupt header must not force a huge
/// allocation. Each input byte expands to at most 64 output bytes.
fn capacity_hint(declared: usize, input_len: usize) -> usize {
    declared.min(input_len.saturating_mul(64))
}

/// Decompresses a complete Snappy stream.
///
/// The declared length is a capacity hint: a mismatch with the produced
/// output is logged but not treated as an error.
pub fn decompress_snappy(input: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0;
    let declared = read_varint_usize(input, &mut pos)
        .map_err(|e| BundleError::corrupt_data(format!("snappy length header: {e}")))?;

    let mut output = Vec::with_capacity(capacity_hint(declared, input.len()));
    while pos < input.len() {
        decode_element(input, &mut pos, &mut output)?;
    }

    if output.len() != declared {
        warn!(
            produced = output.len(),
            declared,
            "snappy output length did not match declared length"
        );
    }
    Ok(output)
}

/// Decompresses a Snappy stream at the start of `input` that may be followed
/// by unrelated bytes.
///
/// Decoding stops as soon as the declared length has been produced. Returns
/// the output and the number of input bytes consumed.
pub fn decompress_snappy_prefix(input: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut pos = 0;
    let declared = read_varint_usize(input, &mut pos)
        .map_err(|e| BundleError::corrupt_data(format!("snappy length header: {e}")))?;

    let mut output = Vec::with_capacity(capacity_hint(declared, input.len()));
    while output.len() < declared {
        if pos >= input.len() {
            return Err(BundleError::corrupt_data(format!(
                "snappy stream ended after {} of {declared} bytes",
                output.len()
            )));
        }
        decode_element(input, &mut pos, &mut output)?;
    }

    if output.len() != declared {
        warn!(
            produced = output.len(),
            declared,
            "snappy output length did not match declared length"
        );
    }
    Ok((output, pos))
}

fn decode_element(input: &[u8], pos: &mut usize, output: &mut Vec<u8>) -> Result<()> {
    let tag = next_byte(input, pos)?;
    let upper = (tag >> 2) as usize;

    match tag & 0b11 {
        TAG_LITERAL => {
            let length = match upper {
                0..=59 => upper + 1,
                60..=63 => {
                    let extra = upper - 59;
                    let bytes = read_slice(input, pos, extra, "snappy literal length")
                        .map_err(|e| BundleError::corrupt_data(e.to_string()))?;
                    le_value(bytes) + 1
                }
                _ => {
                    return Err(BundleError::corrupt_data(format!(
                        "illegal literal length bits {upper}"
                    )))
                }
            };
            let literal = read_slice(input, pos, length, "snappy literal")
                .map_err(|e| BundleError::corrupt_data(e.to_string()))?;
            output.extend_from_slice(literal);
        }
        TAG_COPY_1 => {
            let length = (upper & 0b111) + 4;
            let high = (upper >> 3) << 8;
            let offset = high | next_byte(input, pos)? as usize;
            copy_back(output, offset, length)?;
        }
        TAG_COPY_2 => {
            let bytes = read_slice(input, pos, 2, "snappy copy offset")
                .map_err(|e| BundleError::corrupt_data(e.to_string()))?;
            copy_back(output, le_value(bytes), upper + 1)?;
        }
        _ => {
            let bytes = read_slice(input, pos, 4, "snappy copy offset")
                .map_err(|e| BundleError::corrupt_data(e.to_string()))?;
            copy_back(output, le_value(bytes), upper + 1)?;
        }
    }
    Ok(())
}

/// Appends `length` bytes starting `offset` bytes back from the end of the
/// output. Runs byte by byte so that an offset shorter than the length
/// repeats the pattern.
fn copy_back(output: &mut Vec<u8>, offset: usize, length: usize) -> Result<()> {
    if offset == 0 || offset > output.len() {
        return Err(BundleError::corrupt_data(format!(
            "copy offset {offset} outside of {} decoded bytes",
            output.len()
        )));
    }
    let start = output.len() - offset;
    output.reserve(length);
    for i in 0..length {
        let byte = output[start + i];
        output.push(byte);
    }
    Ok(())
}

fn next_byte(input: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *input
        .get(*pos)
        .ok_or_else(|| BundleError::corrupt_data(format!("snappy stream truncated at {}", *pos)))?;
    *pos += 1;
    Ok(byte)
}

fn le_value(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rev()
        .fold(0usize, |acc, &b| (acc << 8) | b as usize)
}
