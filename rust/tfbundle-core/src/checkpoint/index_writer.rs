// rust/tfbundle-core/src/checkpoint/index_writer.rs

//! Serializes a tensor mapping into `.index` bytes.

use std::collections::BTreeMap;

use prost::Message;
use tracing::debug;

use super::tensor::TensorData;
use crate::error::{BundleError, Result};
use crate::format::table::{
    shortest_successor, write_raw_block, BlockBuilder, Footer, DEFAULT_RESTART_INTERVAL,
};
use crate::format::{masked_crc32c, BundleEntryProto, BundleHeaderProto, TensorShapeProto};

/// Builds the index for a single-shard checkpoint.
///
/// Tensors are laid out in the shard in ascending name order, which is also
/// the key order of the index.
#[derive(Debug, Clone)]
pub struct IndexWriter {
    tensors: BTreeMap<String, TensorData>,
    restart_interval: usize,
}

impl IndexWriter {
    pub fn new(tensors: impl IntoIterator<Item = (String, TensorData)>) -> Self {
        Self {
            tensors: tensors.into_iter().collect(),
            restart_interval: DEFAULT_RESTART_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_restart_interval(mut self, interval: usize) -> Self {
        self.restart_interval = interval.max(1);
        self
    }

    /// Tensor names in key order.
    pub fn ordered_names(&self) -> Vec<&str> {
        self.tensors.keys().map(String::as_str).collect()
    }

    pub fn tensors(&self) -> &BTreeMap<String, TensorData> {
        &self.tensors
    }

    /// Checks every tensor before anything is serialized.
    pub fn validate(&self) -> Result<()> {
        for (name, tensor) in &self.tensors {
            if name.is_empty() {
                return Err(BundleError::invalid_tensor(
                    name,
                    "the empty name is reserved for the bundle header",
                ));
            }
            tensor.validate(name)?;
        }
        Ok(())
    }

    /// Bundle entries with offsets accumulated in key order.
    pub fn entries(&self) -> Result<Vec<(&str, BundleEntryProto)>> {
        self.validate()?;

        let mut offset: i64 = 0;
        let mut entries = Vec::with_capacity(self.tensors.len());
        for (name, tensor) in &self.tensors {
            let size = i64::try_from(tensor.bytes.len()).map_err(|_| {
                BundleError::invalid_tensor(name, "tensor is too large for a bundle entry")
            })?;
            entries.push((
                name.as_str(),
                BundleEntryProto {
                    dtype: tensor.dtype as i32,
                    shape: Some(TensorShapeProto::from_dims(&tensor.shape)),
                    shard_id: 0,
                    offset,
                    size,
                    crc32c: masked_crc32c(&tensor.bytes),
                    slices: Vec::new(),
                },
            ));
            offset += size;
        }
        Ok(entries)
    }

    /// Concatenated tensor payloads, in the order [`entries`](Self::entries)
    /// assigns offsets.
    pub fn shard_data(&self) -> Vec<u8> {
        let total = self.tensors.values().map(|t| t.bytes.len()).sum();
        let mut data = Vec::with_capacity(total);
        for tensor in self.tensors.values() {
            data.extend_from_slice(&tensor.bytes);
        }
        data
    }

    /// Produces the complete `.index` file.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let entries = self.entries()?;

        let mut data_block = BlockBuilder::new(self.restart_interval);
        data_block.add(b"", &BundleHeaderProto::single_writer(1).encode_to_vec());
        for (name, entry) in &entries {
            data_block.add(name.as_bytes(), &entry.encode_to_vec());
        }
        let index_key = shortest_successor(data_block.last_key());
        let restarts = data_block.restarts().len();

        let mut out = Vec::new();
        let data_handle = write_raw_block(&mut out, &data_block.finish());

        let metaindex_block = BlockBuilder::new(self.restart_interval).finish();
        let metaindex_handle = write_raw_block(&mut out, &metaindex_block);

        let mut index_block = BlockBuilder::new(self.restart_interval);
        index_block.add(&index_key, &data_handle.encode());
        let index_handle = write_raw_block(&mut out, &index_block.finish());

        out.extend_from_slice(&Footer::new(metaindex_handle, index_handle).encode());

        debug!(
            tensors = entries.len(),
            restarts,
            bytes = out.len(),
            "serialized checkpoint index"
        );
        Ok(out)
    }
}
