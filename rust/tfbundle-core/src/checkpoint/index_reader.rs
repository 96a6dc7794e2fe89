// rust/tfbundle-core/src/checkpoint/index_reader.rs

//! Sequential reader over the records of a `.index` file.
//!
//! The footer is parsed first, then the index block, then every data block
//! it points at. Each data block is decoded according to its trailer type
//! byte and bounded by its own restart trailer. Entries are then read one at
//! a time with [`IndexReader::read_next_entry`].

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::{BundleError, Result};
use crate::format::table::{
    decode_records, read_block, split_block, BlockHandle, Footer, RecordHeader, FOOTER_SIZE,
};
use crate::format::varint::read_slice;
use crate::format::{decompress_snappy_prefix, BundleEntryProto, BundleHeaderProto};

/// Reader over the key/value records of an index file.
#[derive(Debug)]
pub struct IndexReader {
    /// Record regions of each data block, restart trailers removed.
    blocks: Vec<Vec<u8>>,
    block: usize,
    pos: usize,
    key: Vec<u8>,
    last_key: Option<String>,
    header_consumed: bool,
    legacy: bool,
}

impl IndexReader {
    /// Reads and parses the index file at `path`, verifying block checksums.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| BundleError::storage_with_source(path, "failed to read index file", e))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes_with(bytes, true)
    }

    /// Parses index bytes, optionally skipping block checksum verification.
    pub fn from_bytes_with(bytes: &[u8], verify_checksums: bool) -> Result<Self> {
        let footer = Footer::decode_from_file(bytes)?;
        let body = &bytes[..bytes.len() - FOOTER_SIZE];

        if footer.is_legacy() {
            debug!(bytes = bytes.len(), "reading legacy index without block handles");
            return Ok(Self::with_blocks(vec![legacy_region(body)?], true));
        }

        let index_block = read_block(bytes, footer.index, verify_checksums)?;
        let (index_records, _) = split_block(&index_block)?;

        let mut blocks = Vec::new();
        for (_, value) in decode_records(index_records)? {
            let mut pos = 0;
            let handle = BlockHandle::decode(&value, &mut pos)?;
            let contents = read_block(bytes, handle, verify_checksums)?;
            let (records, restarts) = split_block(&contents)?;
            debug!(
                offset = handle.offset,
                size = handle.size,
                restarts = restarts.len(),
                "loaded data block"
            );
            blocks.push(records.to_vec());
        }

        Ok(Self::with_blocks(blocks, false))
    }

    fn with_blocks(blocks: Vec<Vec<u8>>, legacy: bool) -> Self {
        Self {
            blocks,
            block: 0,
            pos: 0,
            key: Vec::new(),
            last_key: None,
            header_consumed: false,
            legacy,
        }
    }

    /// True if the file had a footer without block handles.
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Rewinds to the first record.
    pub fn reset_head(&mut self) {
        self.block = 0;
        self.pos = 0;
        self.key.clear();
        self.last_key = None;
        self.header_consumed = false;
    }

    /// Rewinds and decodes the header stored under the empty key.
    pub fn read_header(&mut self) -> Result<BundleHeaderProto> {
        self.reset_head();
        self.consume_header()
    }

    /// Returns the next tensor entry, or `None` once every record is read.
    ///
    /// Skips the header record if it has not been consumed yet. Keys must be
    /// strictly ascending.
    pub fn read_next_entry(&mut self) -> Result<Option<(String, BundleEntryProto)>> {
        if !self.header_consumed {
            self.consume_header()?;
        }

        let Some((key, value)) = self.next_record()? else {
            return Ok(None);
        };
        let key = String::from_utf8(key).map_err(|e| {
            BundleError::corrupt_entry(
                String::from_utf8_lossy(e.as_bytes()),
                "key is not valid UTF-8",
            )
        })?;

        if let Some(previous) = &self.last_key {
            if key.as_str() <= previous.as_str() {
                return Err(BundleError::corrupt_entry(
                    key,
                    format!("key does not sort after '{previous}'"),
                ));
            }
        }

        let entry = BundleEntryProto::decode_value(&key, &value)?;
        self.last_key = Some(key.clone());
        Ok(Some((key, entry)))
    }

    /// Reads every entry from the start.
    pub fn read_all_entries(&mut self) -> Result<BTreeMap<String, BundleEntryProto>> {
        self.reset_head();
        let mut entries = BTreeMap::new();
        while let Some((name, entry)) = self.read_next_entry()? {
            entries.insert(name, entry);
        }
        debug!(entries = entries.len(), "read checkpoint index");
        Ok(entries)
    }

    fn consume_header(&mut self) -> Result<BundleHeaderProto> {
        let (key, value) = self
            .next_record()?
            .ok_or_else(|| BundleError::corrupt_entry("", "index has no header record"))?;
        if !key.is_empty() {
            return Err(BundleError::corrupt_entry(
                String::from_utf8_lossy(&key),
                "first key is not the empty header key",
            ));
        }
        let header = BundleHeaderProto::decode_value(&value)?;
        self.header_consumed = true;
        self.last_key = Some(String::new());
        Ok(header)
    }

    /// Decodes the next raw record, applying the shared-prefix rule.
    fn next_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let Some(region) = self.blocks.get(self.block) else {
                return Ok(None);
            };
            if self.pos >= region.len() {
                self.block += 1;
                self.pos = 0;
                self.key.clear();
                continue;
            }

            let mut pos = self.pos;
            let header = RecordHeader::read(region, &mut pos)?;
            if self.legacy && header.is_empty() {
                self.block = self.blocks.len();
                return Ok(None);
            }
            if header.shared > self.key.len() {
                return Err(BundleError::InvalidPrefixCompression {
                    shared: header.shared,
                    prefix_len: self.key.len(),
                });
            }
            let suffix = read_slice(region, &mut pos, header.unshared, "record key")?;
            self.key.truncate(header.shared);
            self.key.extend_from_slice(suffix);
            let value = read_slice(region, &mut pos, header.value_len, "record value")?.to_vec();
            self.pos = pos;
            return Ok(Some((self.key.clone(), value)));
        }
    }
}

/// Data region of a legacy index: everything before the footer, Snappy
/// decompressed first when it does not start with a zero byte.
fn legacy_region(body: &[u8]) -> Result<Vec<u8>> {
    match body.first() {
        Some(&first) if first != 0 => {
            let (decompressed, consumed) = decompress_snappy_prefix(body)?;
            debug!(
                compressed = consumed,
                decompressed = decompressed.len(),
                "decompressed legacy index"
            );
            Ok(decompressed)
        }
        _ => Ok(body.to_vec()),
    }
}
