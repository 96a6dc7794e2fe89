// rust/tfbundle-core/src/checkpoint/writer.rs

//! Checkpoint writer façade.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::index_writer::IndexWriter;
use super::reader::{index_file_name, shard_file_name};
use super::tensor::TensorData;
use crate::config::{BundleConfig, WriterConfig};
use crate::error::{BundleError, Result};
use crate::params::{flatten, FlattenOptions, NamedParameters};
use crate::storage::{LocalStorage, StorageBackend};

/// Writes single-shard checkpoints.
///
/// Everything is validated and serialized in memory before any file is
/// touched. The shard is written before the index, so an index on disk
/// always refers to a complete shard.
pub struct CheckpointWriter {
    storage: Arc<dyn StorageBackend>,
    config: WriterConfig,
}

impl CheckpointWriter {
    pub fn new(storage: Arc<dyn StorageBackend>, config: WriterConfig) -> Self {
        Self { storage, config }
    }

    /// Writer over the local filesystem.
    pub fn local(config: &BundleConfig) -> Result<Self> {
        let storage = Arc::new(LocalStorage::new(&config.storage)?);
        Ok(Self::new(storage, config.writer.clone()))
    }

    /// Writes `{name}.data-00000-of-00001` and `{name}.index` into
    /// `directory` and returns the checkpoint base path `directory/name`.
    pub fn write(
        &self,
        tensors: impl IntoIterator<Item = (String, TensorData)>,
        directory: &Path,
        name: &str,
    ) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(BundleError::invalid_tensor(name, "checkpoint name cannot be empty"));
        }

        let index = IndexWriter::new(tensors).with_restart_interval(self.config.block_restart_interval);
        let index_bytes = index.serialize()?;
        let shard_bytes = index.shard_data();

        self.storage.create_dir_all(directory)?;
        let base = directory.join(name);
        self.write_file(&shard_file_name(&base, 0, 1), &shard_bytes)?;
        self.write_file(&index_file_name(&base), &index_bytes)?;

        info!(
            checkpoint = %base.display(),
            tensors = index.tensors().len(),
            shard_bytes = shard_bytes.len(),
            index_bytes = index_bytes.len(),
            "wrote checkpoint"
        );
        Ok(base)
    }

    /// Like [`write`](Self::write), with the tensors supplied by a callback.
    pub fn write_with<F, I>(&self, name_tensor_pairs: F, directory: &Path, name: &str) -> Result<PathBuf>
    where
        F: FnOnce() -> I,
        I: IntoIterator<Item = (String, TensorData)>,
    {
        self.write(name_tensor_pairs(), directory, name)
    }

    /// Flattens `model` and writes its tensors.
    pub fn write_model(
        &self,
        model: &dyn NamedParameters,
        options: &FlattenOptions,
        directory: &Path,
        name: &str,
    ) -> Result<PathBuf> {
        self.write(flatten(model, options), directory, name)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        if !self.config.atomic_writes {
            return self.write_to_path(path, data);
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

        let result = self
            .write_to_path(&temp_path, data)
            .and_then(|()| self.storage.rename(&temp_path, path));
        if result.is_err() && self.storage.exists(&temp_path).unwrap_or(false) {
            if let Err(e) = self.storage.delete(&temp_path) {
                warn!(path = %temp_path.display(), error = %e, "failed to remove temporary file");
            }
        }
        result
    }

    fn write_to_path(&self, path: &Path, data: &[u8]) -> Result<()> {
        let mut writer = self.storage.open_write(path)?;
        writer
            .write_all(data)
            .map_err(|e| BundleError::storage_with_source(path, "failed to write checkpoint data", e))?;
        writer.finish()
    }
}
