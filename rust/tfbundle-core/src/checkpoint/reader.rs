// rust/tfbundle-core/src/checkpoint/reader.rs

//! Checkpoint reader façade.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::archive::{extract_checkpoint_archive, is_archive};
use super::index_reader::IndexReader;
use super::tensor::TensorData;
use crate::config::{BundleConfig, ReaderConfig};
use crate::error::{BundleError, Result};
use crate::format::{masked_crc32c, BundleEntryProto, BundleHeaderProto, DataType};
use crate::storage::{LocalStorage, StorageBackend, StorageReader};

/// Where a checkpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointLocation {
    /// Local checkpoint base path (without `.index`).
    Local(PathBuf),
    /// `http://`, `https://` or `s3://` URL of the checkpoint base.
    Remote(String),
}

impl CheckpointLocation {
    pub fn parse(location: &str) -> Self {
        const REMOTE_SCHEMES: [&str; 3] = ["http://", "https://", "s3://"];
        if REMOTE_SCHEMES.iter().any(|scheme| location.starts_with(scheme)) {
            Self::Remote(location.to_string())
        } else if let Some(path) = location.strip_prefix("file://") {
            Self::Local(PathBuf::from(path))
        } else {
            Self::Local(PathBuf::from(location))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl fmt::Display for CheckpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => f.write_str(url),
        }
    }
}

/// Appends `suffix` to the final component of `base`.
fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// `{base}.index`
pub fn index_file_name(base: &Path) -> PathBuf {
    with_suffix(base, ".index")
}

/// `{base}.data-{shard:05}-of-{num_shards:05}`
pub fn shard_file_name(base: &Path, shard: i32, num_shards: i32) -> PathBuf {
    with_suffix(base, &format!(".data-{shard:05}-of-{num_shards:05}"))
}

/// Read access to a checkpoint: its header, the metadata of every tensor
/// and the tensor bytes.
///
/// The index is read once when the checkpoint is opened; shard files are
/// opened on first use and kept open.
pub struct CheckpointReader {
    storage: Arc<dyn StorageBackend>,
    base: PathBuf,
    header: BundleHeaderProto,
    entries: BTreeMap<String, BundleEntryProto>,
    verify_crc: bool,
    shards: HashMap<i32, Box<dyn StorageReader>>,
}

impl CheckpointReader {
    /// Opens the checkpoint whose files start with `base`, with default
    /// reader options.
    pub fn open(storage: Arc<dyn StorageBackend>, base: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(storage, base, &ReaderConfig::default())
    }

    pub fn open_with(
        storage: Arc<dyn StorageBackend>,
        base: impl Into<PathBuf>,
        config: &ReaderConfig,
    ) -> Result<Self> {
        let base = base.into();
        let index_path = index_file_name(&base);
        let bytes = storage.read_file(&index_path)?;

        let mut index = IndexReader::from_bytes_with(&bytes, config.verify_block_checksums)?;
        let header = index.read_header()?;
        if header.num_shards < 1 {
            return Err(BundleError::corrupt_entry(
                "",
                format!("header declares {} shards", header.num_shards),
            ));
        }
        let entries = index.read_all_entries()?;

        info!(
            checkpoint = %base.display(),
            tensors = entries.len(),
            shards = header.num_shards,
            "opened checkpoint"
        );

        Ok(Self {
            storage,
            base,
            header,
            entries,
            verify_crc: config.verify_crc,
            shards: HashMap::new(),
        })
    }

    /// Opens a checkpoint on the local filesystem.
    pub fn open_local(base: impl Into<PathBuf>, config: &BundleConfig) -> Result<Self> {
        let storage = Arc::new(LocalStorage::new(&config.storage)?);
        Self::open_with(storage, base, &config.reader)
    }

    /// Opens a checkpoint from a local path or a remote URL. Remote
    /// checkpoints are downloaded into `config.fetch.cache_root/model_name`
    /// first; archives, local or remote, are unpacked there.
    pub async fn load(location: &str, model_name: &str, config: &BundleConfig) -> Result<Self> {
        let base = match CheckpointLocation::parse(location) {
            CheckpointLocation::Local(path) if is_archive(&path.to_string_lossy()) => {
                let target_dir = config.fetch.cache_root.join(model_name);
                extract_checkpoint_archive(&path, &target_dir)?
            }
            CheckpointLocation::Local(base) => base,
            CheckpointLocation::Remote(url) => fetch_remote(&url, model_name, config).await?,
        };
        Self::open_local(base, config)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn header(&self) -> &BundleHeaderProto {
        &self.header
    }

    pub fn tensor_count(&self) -> usize {
        self.entries.len()
    }

    /// Tensor names in ascending order.
    pub fn tensor_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains_tensor(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn metadata(&self, name: &str) -> Result<&BundleEntryProto> {
        self.entries
            .get(name)
            .ok_or_else(|| BundleError::tensor_not_found(name))
    }

    pub fn shape_of_tensor(&self, name: &str) -> Result<Vec<i64>> {
        Ok(self.metadata(name)?.shape_dims())
    }

    pub fn dtype_of_tensor(&self, name: &str) -> Result<DataType> {
        let entry = self.metadata(name)?;
        DataType::try_from(entry.dtype).map_err(|_| {
            BundleError::corrupt_entry(name, format!("unknown dtype {}", entry.dtype))
        })
    }

    /// Enables or disables CRC verification in [`load_tensor`](Self::load_tensor).
    pub fn set_crc_verification(&mut self, enabled: bool) {
        self.verify_crc = enabled;
    }

    /// Reads a tensor's bytes from its shard.
    pub fn load_tensor(&mut self, name: &str) -> Result<TensorData> {
        let entry = self.metadata(name)?.clone();
        let dtype = self.dtype_of_tensor(name)?;

        if !entry.slices.is_empty() {
            return Err(BundleError::invalid_tensor(
                name,
                "partitioned (sliced) tensors are not supported",
            ));
        }
        if entry.shard_id < 0 || entry.shard_id >= self.header.num_shards {
            return Err(BundleError::corrupt_entry(
                name,
                format!(
                    "shard {} is outside of {} shards",
                    entry.shard_id, self.header.num_shards
                ),
            ));
        }
        let (Ok(offset), Ok(size)) = (u64::try_from(entry.offset), usize::try_from(entry.size))
        else {
            return Err(BundleError::corrupt_entry(
                name,
                format!("invalid byte range {}+{}", entry.offset, entry.size),
            ));
        };

        let bytes = self.shard(entry.shard_id)?.read_range(offset, size)?;

        if self.verify_crc {
            let actual = masked_crc32c(&bytes);
            if actual != entry.crc32c {
                return Err(BundleError::ChecksumMismatch {
                    name: name.to_string(),
                    expected: entry.crc32c,
                    actual,
                });
            }
        }

        let tensor = TensorData::new(dtype, entry.shape_dims(), bytes);
        if dtype.byte_width().is_some() {
            tensor.validate(name)?;
        }
        debug!(tensor = name, dtype = dtype.name(), bytes = size, "loaded tensor");
        Ok(tensor)
    }

    /// Path of a shard file. A single-shard checkpoint whose numbered shard
    /// is missing falls back to a file named exactly like the base.
    pub fn shard_path(&self, shard: i32) -> Result<PathBuf> {
        let path = shard_file_name(&self.base, shard, self.header.num_shards);
        if self.header.num_shards == 1
            && !self.storage.exists(&path)?
            && self.storage.exists(&self.base)?
        {
            return Ok(self.base.clone());
        }
        Ok(path)
    }

    fn shard(&mut self, shard: i32) -> Result<&mut Box<dyn StorageReader>> {
        if !self.shards.contains_key(&shard) {
            let path = self.shard_path(shard)?;
            let reader = self.storage.open_read(&path)?;
            self.shards.insert(shard, reader);
        }
        self.shards
            .get_mut(&shard)
            .ok_or_else(|| BundleError::storage(&self.base, format!("shard {shard} is not open")))
    }
}

#[cfg(feature = "remote")]
async fn fetch_remote(url: &str, model_name: &str, config: &BundleConfig) -> Result<PathBuf> {
    let fetcher = super::fetch::CheckpointFetcher::for_url(url, &config.fetch)?;
    if is_archive(url) {
        fetcher.fetch_archive(model_name).await
    } else {
        fetcher.fetch(model_name, &[]).await
    }
}

#[cfg(not(feature = "remote"))]
async fn fetch_remote(url: &str, _model_name: &str, _config: &BundleConfig) -> Result<PathBuf> {
    Err(BundleError::download(
        url,
        "remote checkpoints require the `remote` feature",
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::writer::CheckpointWriter;
    use crate::config::StorageConfig;
    use crate::format::table::{shortest_successor, write_raw_block, BlockBuilder, Footer};
    use crate::format::TensorShapeProto;
    use prost::Message;
    use tempfile::TempDir;

    /// Files of a checkpoint named `model` whose two tensors live in
    /// different shards: `a = [3.0]` in shard 0 and `b = [7.0]` in shard 1.
    pub(crate) fn two_shard_files() -> Vec<(String, Vec<u8>)> {
        let a = 3.0f32.to_le_bytes().to_vec();
        let b = 7.0f32.to_le_bytes().to_vec();
        let entry = |shard_id: i32, payload: &[u8]| {
            BundleEntryProto {
                dtype: DataType::DtFloat as i32,
                shape: Some(TensorShapeProto::from_dims(&[1])),
                shard_id,
                offset: 0,
                size: payload.len() as i64,
                crc32c: masked_crc32c(payload),
                slices: Vec::new(),
            }
            .encode_to_vec()
        };

        let mut data = BlockBuilder::new(15);
        data.add(b"", &BundleHeaderProto::single_writer(2).encode_to_vec());
        data.add(b"a", &entry(0, &a));
        data.add(b"b", &entry(1, &b));
        let index_key = shortest_successor(data.last_key());

        let mut index = Vec::new();
        let data_handle = write_raw_block(&mut index, &data.finish());
        let metaindex_handle = write_raw_block(&mut index, &BlockBuilder::new(15).finish());
        let mut index_block = BlockBuilder::new(15);
        index_block.add(&index_key, &data_handle.encode());
        let index_handle = write_raw_block(&mut index, &index_block.finish());
        index.extend_from_slice(&Footer::new(metaindex_handle, index_handle).encode());

        vec![
            ("model.index".to_string(), index),
            ("model.data-00000-of-00002".to_string(), a),
            ("model.data-00001-of-00002".to_string(), b),
        ]
    }

    fn local_storage(dir: &TempDir) -> Arc<dyn StorageBackend> {
        let config = StorageConfig {
            base_path: dir.path().to_path_buf(),
            ..Default::default()
        };
        Arc::new(LocalStorage::new(&config).unwrap())
    }

    fn sample_tensors() -> Vec<(String, TensorData)> {
        vec![
            (
                "model/vector".to_string(),
                TensorData::from_f32(vec![3], &[1.0, 2.0, 3.0]),
            ),
            (
                "model/matrix".to_string(),
                TensorData::from_f32(vec![2, 2], &[4.0, 5.0, 6.0, 7.0]),
            ),
            ("ones".to_string(), TensorData::from_f32(vec![1, 4], &[1.0; 4])),
            ("tensor".to_string(), TensorData::from_i64(vec![], &[42])),
        ]
    }

    fn write_sample(dir: &TempDir) -> (Arc<dyn StorageBackend>, PathBuf) {
        let storage = local_storage(dir);
        let writer = CheckpointWriter::new(storage.clone(), Default::default());
        let base = writer
            .write(sample_tensors(), &dir.path().join("ckpt"), "model")
            .unwrap();
        (storage, base)
    }

    #[test]
    fn test_location_parse() {
        assert_eq!(
            CheckpointLocation::parse("https://host/models/gpt2/model.ckpt"),
            CheckpointLocation::Remote("https://host/models/gpt2/model.ckpt".to_string())
        );
        assert!(CheckpointLocation::parse("http://host/m").is_remote());
        assert!(CheckpointLocation::parse("s3://bucket/m").is_remote());
        assert_eq!(
            CheckpointLocation::parse("file:///tmp/model"),
            CheckpointLocation::Local(PathBuf::from("/tmp/model"))
        );
        assert_eq!(
            CheckpointLocation::parse("checkpoints/model"),
            CheckpointLocation::Local(PathBuf::from("checkpoints/model"))
        );
    }

    #[test]
    fn test_file_names() {
        let base = Path::new("/ckpt/model.ckpt");
        assert_eq!(index_file_name(base), PathBuf::from("/ckpt/model.ckpt.index"));
        assert_eq!(
            shard_file_name(base, 0, 1),
            PathBuf::from("/ckpt/model.ckpt.data-00000-of-00001")
        );
        assert_eq!(
            shard_file_name(base, 12, 100),
            PathBuf::from("/ckpt/model.ckpt.data-00012-of-00100")
        );
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (storage, base) = write_sample(&dir);

        let mut reader = CheckpointReader::open(storage, &base).unwrap();
        assert_eq!(reader.header().num_shards, 1);
        assert_eq!(reader.tensor_count(), 4);
        assert_eq!(
            reader.tensor_names().collect::<Vec<_>>(),
            vec!["model/matrix", "model/vector", "ones", "tensor"]
        );

        for (name, expected) in sample_tensors() {
            assert!(reader.contains_tensor(&name));
            assert_eq!(reader.shape_of_tensor(&name).unwrap(), expected.shape);
            assert_eq!(reader.dtype_of_tensor(&name).unwrap(), expected.dtype);
            assert_eq!(reader.load_tensor(&name).unwrap(), expected);
        }
    }

    #[test]
    fn test_minimal_checkpoint() {
        let dir = TempDir::new().unwrap();
        let storage = local_storage(&dir);
        let writer = CheckpointWriter::new(storage.clone(), Default::default());
        let vector = TensorData::from_f32(vec![4], &[0.1, 0.2, 0.3, 0.4]);
        let base = writer
            .write(vec![("model/vector".to_string(), vector.clone())], dir.path(), "model")
            .unwrap();

        let mut reader = CheckpointReader::open(storage, base).unwrap();
        assert_eq!(reader.tensor_count(), 1);
        assert_eq!(reader.load_tensor("model/vector").unwrap().to_f32().unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_unknown_tensor() {
        let dir = TempDir::new().unwrap();
        let (storage, base) = write_sample(&dir);
        let mut reader = CheckpointReader::open(storage, base).unwrap();

        assert!(!reader.contains_tensor("missing"));
        assert!(matches!(
            reader.load_tensor("missing").unwrap_err(),
            BundleError::TensorNotFound { .. }
        ));
        assert!(reader.shape_of_tensor("missing").is_err());
    }

    #[test]
    fn test_crc_mismatch_on_flipped_byte() {
        let dir = TempDir::new().unwrap();
        let (storage, base) = write_sample(&dir);

        // "model/matrix" is first in the shard; flip its first byte.
        let shard = shard_file_name(&base, 0, 1);
        let mut bytes = std::fs::read(&shard).unwrap();
        bytes[0] ^= 0x01;
        std::fs::write(&shard, bytes).unwrap();

        let mut reader = CheckpointReader::open(storage, &base).unwrap();
        assert!(matches!(
            reader.load_tensor("model/matrix").unwrap_err(),
            BundleError::ChecksumMismatch { ref name, .. } if name == "model/matrix"
        ));
        // Other tensors are unaffected.
        assert!(reader.load_tensor("model/vector").is_ok());

        reader.set_crc_verification(false);
        assert!(reader.load_tensor("model/matrix").is_ok());
    }

    #[test]
    fn test_bare_shard_fallback() {
        let dir = TempDir::new().unwrap();
        let (storage, base) = write_sample(&dir);
        std::fs::rename(shard_file_name(&base, 0, 1), &base).unwrap();

        let mut reader = CheckpointReader::open(storage, &base).unwrap();
        assert_eq!(reader.shard_path(0).unwrap(), base);
        assert_eq!(
            reader.load_tensor("tensor").unwrap().to_i64().unwrap(),
            vec![42]
        );
    }

    #[test]
    fn test_missing_index() {
        let dir = TempDir::new().unwrap();
        let storage = local_storage(&dir);
        assert!(matches!(
            CheckpointReader::open(storage, dir.path().join("nothing")),
            Err(BundleError::Storage { .. })
        ));
    }

    #[test]
    fn test_open_local() {
        let dir = TempDir::new().unwrap();
        let (_, base) = write_sample(&dir);
        let reader = CheckpointReader::open_local(&base, &BundleConfig::default()).unwrap();
        assert_eq!(reader.tensor_count(), 4);
    }

    #[test]
    fn test_two_shard_checkpoint() {
        let dir = TempDir::new().unwrap();
        for (name, bytes) in two_shard_files() {
            std::fs::write(dir.path().join(name), bytes).unwrap();
        }
        let base = dir.path().join("model");

        let mut reader = CheckpointReader::open(local_storage(&dir), &base).unwrap();
        assert_eq!(reader.header().num_shards, 2);
        assert_eq!(reader.metadata("b").unwrap().shard_id, 1);
        assert_eq!(reader.shard_path(1).unwrap(), shard_file_name(&base, 1, 2));
        assert_eq!(reader.load_tensor("a").unwrap().to_f32().unwrap(), vec![3.0]);
        assert_eq!(reader.load_tensor("b").unwrap().to_f32().unwrap(), vec![7.0]);
    }

    #[test]
    fn test_missing_second_shard() {
        let dir = TempDir::new().unwrap();
        for (name, bytes) in two_shard_files() {
            if !name.contains("00001-of") {
                std::fs::write(dir.path().join(name), bytes).unwrap();
            }
        }

        let mut reader = CheckpointReader::open(local_storage(&dir), dir.path().join("model")).unwrap();
        assert!(reader.load_tensor("a").is_ok());
        assert!(matches!(
            reader.load_tensor("b").unwrap_err(),
            BundleError::Storage { .. }
        ));
    }

    #[tokio::test]
    async fn test_load_local_location() {
        let dir = TempDir::new().unwrap();
        let (_, base) = write_sample(&dir);
        let location = format!("file://{}", base.display());

        let reader = CheckpointReader::load(&location, "unused", &BundleConfig::default())
            .await
            .unwrap();
        assert!(reader.contains_tensor("ones"));
    }

    #[tokio::test]
    async fn test_load_local_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("gpt2.tgz");
        std::fs::write(&archive, crate::checkpoint::archive::tests::checkpoint_tarball()).unwrap();
        let mut config = BundleConfig::default();
        config.fetch.cache_root = dir.path().join("cache");

        let mut reader = CheckpointReader::load(&archive.to_string_lossy(), "gpt2", &config)
            .await
            .unwrap();
        assert_eq!(reader.base(), dir.path().join("cache/gpt2/gpt2/model"));
        assert_eq!(reader.load_tensor("a").unwrap().to_f32().unwrap(), vec![3.0]);
    }
}
