// rust/tfbundle-core/src/format/table.rs

//! Sorted string table layout used by `.index` files.
//!
//! ## File layout
//!
//! ```text
//! +----------------------------+
//! | Data block(s)              |  <- header record + tensor records
//! +----------------------------+
//! | Meta-index block           |  <- always empty
//! +----------------------------+
//! | Index block                |  <- separator key -> data block handle
//! +----------------------------+
//! | Footer (48 bytes)          |  <- two handles, padding, magic
//! +----------------------------+
//! ```
//!
//! ## Block layout
//!
//! ```text
//! +----------------------------+
//! | Records                    |  <- shared, unshared, value_len (varints),
//! | ...                        |     unshared key bytes, value bytes
//! +----------------------------+
//! | Restart offsets            |  <- u32 LE each
//! +----------------------------+
//! | Restart count              |  <- u32 LE
//! +----------------------------+
//! | Block type (1 byte)        |  <- 0 = raw, 1 = Snappy
//! +----------------------------+
//! | Masked CRC-32C (4 bytes)   |  <- over contents + type byte
//! +----------------------------+
//! ```
//!
//! A block handle's size covers the contents only, not the 5-byte trailer.

use super::crc::{crc32c, crc32c_extend, mask, unmask};
use super::snappy::decompress_snappy;
use super::varint::{read_slice, read_u32_le, read_varint, read_varint_usize, write_varint};
use crate::error::{BundleError, Result};

/// Fixed footer size: two maximally encoded handles plus the magic number.
pub const FOOTER_SIZE: usize = 48;

/// Size of the type byte plus checksum that follows every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Footer magic number, stored little-endian.
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;

/// Records between full-key restart points.
pub const DEFAULT_RESTART_INTERVAL: usize = 15;

/// Compression applied to a block's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Raw,
    Snappy,
}

impl BlockType {
    pub fn to_byte(self) -> u8 {
        match self {
            BlockType::Raw => 0,
            BlockType::Snappy => 1,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(BlockType::Raw),
            1 => Ok(BlockType::Snappy),
            other => Err(BundleError::UnsupportedCompression { block_type: other }),
        }
    }
}

/// Location of a block within the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        write_varint(self.offset, buf);
        write_varint(self.size, buf);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let offset = read_varint(buf, pos)?;
        let size = read_varint(buf, pos)?;
        Ok(Self { offset, size })
    }

    pub fn is_null(&self) -> bool {
        self.offset == 0 && self.size == 0
    }
}

/// The fixed-size trailer of an index file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footer {
    pub metaindex: BlockHandle,
    pub index: BlockHandle,
}

impl Footer {
    pub fn new(metaindex: BlockHandle, index: BlockHandle) -> Self {
        Self { metaindex, index }
    }

    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut handles = Vec::with_capacity(FOOTER_SIZE);
        self.metaindex.encode_to(&mut handles);
        self.index.encode_to(&mut handles);

        let mut bytes = [0u8; FOOTER_SIZE];
        bytes[..handles.len()].copy_from_slice(&handles);
        bytes[FOOTER_SIZE - 8..].copy_from_slice(&TABLE_MAGIC.to_le_bytes());
        bytes
    }

    /// Parses the footer from the last [`FOOTER_SIZE`] bytes of `file`.
    pub fn decode_from_file(file: &[u8]) -> Result<Self> {
        if file.len() < FOOTER_SIZE {
            return Err(BundleError::truncated("footer", 0, FOOTER_SIZE, file.len()));
        }
        let footer = &file[file.len() - FOOTER_SIZE..];

        let mut magic_bytes = [0u8; 8];
        magic_bytes.copy_from_slice(&footer[FOOTER_SIZE - 8..]);
        let magic = u64::from_le_bytes(magic_bytes);
        if magic != TABLE_MAGIC {
            return Err(BundleError::BadMagic { found: magic });
        }

        let handles = &footer[..FOOTER_SIZE - 8];
        let mut pos = 0;
        let metaindex = BlockHandle::decode(handles, &mut pos)?;
        let index = BlockHandle::decode(handles, &mut pos)?;
        Ok(Self { metaindex, index })
    }

    /// True for footers written without block handles.
    pub fn is_legacy(&self) -> bool {
        self.metaindex.is_null() && self.index.is_null()
    }
}

/// Builds one prefix-compressed block.
///
/// The first record after each restart point stores its full key.
#[derive(Debug)]
pub struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    restart_interval: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            restart_interval: restart_interval.max(1),
            last_key: Vec::new(),
        }
    }

    /// Appends a record. Keys must arrive in ascending order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter < self.restart_interval {
            common_prefix_len(&self.last_key, key)
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };

        write_varint(shared as u64, &mut self.buffer);
        write_varint((key.len() - shared) as u64, &mut self.buffer);
        write_varint(value.len() as u64, &mut self.buffer);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    pub fn restarts(&self) -> &[u32] {
        &self.restarts
    }

    /// Appends the restart trailer and returns the block contents.
    pub fn finish(mut self) -> Vec<u8> {
        for restart in &self.restarts {
            self.buffer.extend_from_slice(&restart.to_le_bytes());
        }
        self.buffer
            .extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.buffer
    }
}

/// Length of the common prefix of two keys.
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Shortest key that sorts after `key`: the first byte that is not 0xFF is
/// incremented and the key is cut right after it.
pub fn shortest_successor(key: &[u8]) -> Vec<u8> {
    for (i, &byte) in key.iter().enumerate() {
        if byte != 0xFF {
            let mut successor = key[..=i].to_vec();
            successor[i] = byte + 1;
            return successor;
        }
    }
    key.to_vec()
}

/// Appends `contents` plus the block trailer to `out` and returns its handle.
pub fn write_raw_block(out: &mut Vec<u8>, contents: &[u8]) -> BlockHandle {
    let handle = BlockHandle::new(out.len() as u64, contents.len() as u64);
    let block_type = BlockType::Raw.to_byte();
    let crc = mask(crc32c_extend(crc32c(contents), &[block_type]));

    out.extend_from_slice(contents);
    out.push(block_type);
    out.extend_from_slice(&crc.to_le_bytes());
    handle
}

/// Reads the block at `handle`, verifies the trailer checksum if requested
/// and returns the decompressed contents.
pub fn read_block(file: &[u8], handle: BlockHandle, verify_checksum: bool) -> Result<Vec<u8>> {
    let start = usize::try_from(handle.offset)
        .map_err(|_| BundleError::corrupt_data("block offset out of range"))?;
    let size = usize::try_from(handle.size)
        .map_err(|_| BundleError::corrupt_data("block size out of range"))?;

    let mut pos = start;
    let contents = read_slice(file, &mut pos, size, "block contents")?;
    let trailer = read_slice(file, &mut pos, BLOCK_TRAILER_SIZE, "block trailer")?;
    let block_type = trailer[0];

    if verify_checksum {
        let mut crc_pos = 1;
        let stored = read_u32_le(trailer, &mut crc_pos)?;
        let actual = crc32c_extend(crc32c(contents), &[block_type]);
        if unmask(stored) != actual {
            return Err(BundleError::corrupt_data(format!(
                "block at offset {start} has checksum {:#010x}, expected {:#010x}",
                mask(actual),
                stored
            )));
        }
    }

    match BlockType::from_byte(block_type)? {
        BlockType::Raw => Ok(contents.to_vec()),
        BlockType::Snappy => decompress_snappy(contents),
    }
}

/// Splits block contents into the record region and restart offsets.
pub fn split_block(contents: &[u8]) -> Result<(&[u8], Vec<u32>)> {
    if contents.len() < 4 {
        return Err(BundleError::truncated("restart count", 0, 4, contents.len()));
    }
    let mut pos = contents.len() - 4;
    let count = read_u32_le(contents, &mut pos)? as usize;

    let trailer_len = count
        .checked_add(1)
        .and_then(|n| n.checked_mul(4))
        .filter(|&len| len <= contents.len())
        .ok_or_else(|| {
            BundleError::corrupt_data(format!(
                "restart count {count} does not fit in a {}-byte block",
                contents.len()
            ))
        })?;

    let records_end = contents.len() - trailer_len;
    let mut pos = records_end;
    let mut restarts = Vec::with_capacity(count);
    for _ in 0..count {
        restarts.push(read_u32_le(contents, &mut pos)?);
    }
    Ok((&contents[..records_end], restarts))
}

/// One decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub shared: usize,
    pub unshared: usize,
    pub value_len: usize,
}

impl RecordHeader {
    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self> {
        Ok(Self {
            shared: read_varint_usize(buf, pos)?,
            unshared: read_varint_usize(buf, pos)?,
            value_len: read_varint_usize(buf, pos)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.shared == 0 && self.unshared == 0 && self.value_len == 0
    }
}

/// Decodes every record of a block region into `(key, value)` pairs,
/// applying the shared-prefix rule.
pub fn decode_records(records: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut pos = 0;
    let mut prefix: Vec<u8> = Vec::new();
    let mut out = Vec::new();
    while pos < records.len() {
        let header = RecordHeader::read(records, &mut pos)?;
        if header.shared > prefix.len() {
            return Err(BundleError::InvalidPrefixCompression {
                shared: header.shared,
                prefix_len: prefix.len(),
            });
        }
        let suffix = read_slice(records, &mut pos, header.unshared, "record key")?;
        prefix.truncate(header.shared);
        prefix.extend_from_slice(suffix);
        let value = read_slice(records, &mut pos, header.value_len, "record value")?;
        out.push((prefix.clone(), value.to_vec()));
    }
    Ok(out)
}
