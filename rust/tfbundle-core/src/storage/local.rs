// rust/tfbundle-core/src/storage/local.rs

//! Local filesystem storage backend.
//!
//! Small files are read through a buffered reader; files at or above the
//! configured threshold are memory-mapped, which suits large shard files
//! where only a few tensors are loaded.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::trace;

use super::traits::{StorageBackend, StorageReader, StorageWriter};
use crate::config::StorageConfig;
use crate::error::{BundleError, Result};

/// Local filesystem storage backend.
///
/// Relative paths are resolved against the configured base path; absolute
/// paths are used as given.
pub struct LocalStorage {
    base_path: PathBuf,
    buffer_size: usize,
    use_mmap: bool,
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base path cannot be created.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let base_path = config.base_path.clone();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                BundleError::storage_with_source(&base_path, "failed to create base directory", e)
            })?;
        }

        Ok(Self {
            base_path,
            buffer_size: config.buffer_size,
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        })
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    BundleError::storage_with_source(
                        parent,
                        "failed to create parent directories",
                        e,
                    )
                })?;
            }
        }
        Ok(())
    }
}

impl StorageBackend for LocalStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.resolve_path(path).exists())
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let full_path = self.resolve_path(path);
        let file = File::open(&full_path)
            .map_err(|e| BundleError::storage_with_source(&full_path, "failed to open file", e))?;

        let size = file
            .metadata()
            .map_err(|e| {
                BundleError::storage_with_source(&full_path, "failed to read file metadata", e)
            })?
            .len();

        if self.use_mmap && size >= self.mmap_threshold {
            trace!(path = %full_path.display(), size, "memory-mapping file");
            // SAFETY: The file is opened read-only and the Mmap lives as long
            // as the reader.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                BundleError::storage_with_source(&full_path, "failed to memory-map file", e)
            })?;
            Ok(Box::new(MmapReader {
                mmap,
                path: full_path,
            }))
        } else {
            Ok(Box::new(LocalReader {
                reader: BufReader::with_capacity(self.buffer_size, file),
                size,
                path: full_path,
            }))
        }
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        let full_path = self.resolve_path(path);
        Self::ensure_parent(&full_path)?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full_path)
            .map_err(|e| {
                BundleError::storage_with_source(&full_path, "failed to create file", e)
            })?;

        Ok(Box::new(LocalWriter {
            writer: BufWriter::with_capacity(self.buffer_size, file),
            path: full_path,
        }))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);

        if full_path.is_dir() {
            fs::remove_dir_all(&full_path).map_err(|e| {
                BundleError::storage_with_source(&full_path, "failed to delete directory", e)
            })
        } else {
            fs::remove_file(&full_path).map_err(|e| {
                BundleError::storage_with_source(&full_path, "failed to delete file", e)
            })
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.resolve_path(from);
        let to_path = self.resolve_path(to);
        Self::ensure_parent(&to_path)?;

        fs::rename(&from_path, &to_path).map_err(|e| {
            BundleError::storage_with_source(
                &from_path,
                format!("failed to rename to {}", to_path.display()),
                e,
            )
        })
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path).map_err(|e| {
            BundleError::storage_with_source(&full_path, "failed to create directories", e)
        })
    }
}

/// Buffered file reader.
struct LocalReader {
    reader: BufReader<File>,
    size: u64,
    path: PathBuf,
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        check_range(&self.path, start, length, self.size)?;

        self.reader.seek(SeekFrom::Start(start)).map_err(|e| {
            BundleError::storage_with_source(
                &self.path,
                format!("failed to seek to position {start}"),
                e,
            )
        })?;

        let mut buf = vec![0u8; length];
        self.reader.read_exact(&mut buf).map_err(|e| {
            BundleError::storage_with_source(
                &self.path,
                format!("failed to read {length} bytes at position {start}"),
                e,
            )
        })?;
        Ok(buf)
    }
}

/// Memory-mapped file reader.
struct MmapReader {
    mmap: Mmap,
    path: PathBuf,
}

impl StorageReader for MmapReader {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        check_range(&self.path, start, length, self.mmap.len() as u64)?;
        let start = start as usize;
        Ok(self.mmap[start..start + length].to_vec())
    }
}

fn check_range(path: &Path, start: u64, length: usize, size: u64) -> Result<()> {
    let end = start.checked_add(length as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(BundleError::storage(
            path,
            format!("read range {start}+{length} exceeds file size {size}"),
        )),
    }
}

/// Buffered file writer.
struct LocalWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

impl StorageWriter for LocalWriter {
    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| BundleError::storage_with_source(&self.path, "failed to flush writer", e))?;

        self.writer.get_ref().sync_all().map_err(|e| {
            BundleError::storage_with_source(&self.path, "failed to sync file to disk", e)
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (LocalStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            buffer_size: 4096,
            use_mmap: true,
            mmap_threshold: 1024, // Low threshold for testing
        };
        let storage = LocalStorage::new(&config).unwrap();
        (storage, temp_dir)
    }

    fn write_file(storage: &LocalStorage, path: &str, data: &[u8]) {
        let mut writer = storage.open_write(Path::new(path)).unwrap();
        writer.write_all(data).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn test_new_creates_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let new_base = temp_dir.path().join("new_subdir");

        let config = StorageConfig {
            base_path: new_base.clone(),
            ..Default::default()
        };

        let _storage = LocalStorage::new(&config).unwrap();
        assert!(new_base.exists());
    }

    #[test]
    fn test_exists_file() {
        let (storage, _temp) = create_test_storage();
        assert!(!storage.exists(Path::new("model.index")).unwrap());

        write_file(&storage, "model.index", b"hello");
        assert!(storage.exists(Path::new("model.index")).unwrap());
    }

    #[test]
    fn test_read_small_file() {
        let (storage, _temp) = create_test_storage();
        write_file(&storage, "small.bin", b"hello world");

        let mut reader = storage.open_read(Path::new("small.bin")).unwrap();
        assert_eq!(reader.size(), 11);
        assert_eq!(reader.read_range(6, 5).unwrap(), b"world");
        assert_eq!(reader.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn test_read_large_file_with_mmap() {
        let (storage, _temp) = create_test_storage();
        let data: Vec<u8> = (0..2048).map(|i| (i % 256) as u8).collect();
        write_file(&storage, "large.bin", &data);

        let mut reader = storage.open_read(Path::new("large.bin")).unwrap();
        assert_eq!(reader.size(), 2048);
        assert_eq!(reader.read_range(100, 50).unwrap(), &data[100..150]);
        assert_eq!(storage.read_file(Path::new("large.bin")).unwrap(), data);
    }

    #[test]
    fn test_read_range_out_of_bounds() {
        let (storage, _temp) = create_test_storage();
        write_file(&storage, "small.bin", b"hello");
        write_file(&storage, "large.bin", &[7u8; 2048]);

        let mut small = storage.open_read(Path::new("small.bin")).unwrap();
        assert!(small.read_range(3, 10).is_err());

        let mut large = storage.open_read(Path::new("large.bin")).unwrap();
        assert!(large.read_range(2000, 100).is_err());
        assert!(large.read_range(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_mmap_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig {
            base_path: temp_dir.path().to_path_buf(),
            use_mmap: false,
            mmap_threshold: 0,
            ..Default::default()
        };
        let storage = LocalStorage::new(&config).unwrap();
        let data = vec![3u8; 4096];
        write_file(&storage, "shard", &data);

        let mut reader = storage.open_read(Path::new("shard")).unwrap();
        assert_eq!(reader.read_range(4000, 96).unwrap(), vec![3u8; 96]);
    }

    #[test]
    fn test_delete_file_and_directory() {
        let (storage, _temp) = create_test_storage();
        write_file(&storage, "dir/file.bin", b"x");

        storage.delete(Path::new("dir/file.bin")).unwrap();
        assert!(!storage.exists(Path::new("dir/file.bin")).unwrap());

        storage.delete(Path::new("dir")).unwrap();
        assert!(!storage.exists(Path::new("dir")).unwrap());
        assert!(storage.delete(Path::new("dir")).is_err());
    }

    #[test]
    fn test_rename_replaces_destination() {
        let (storage, _temp) = create_test_storage();
        write_file(&storage, ".model.index.tmp", b"new");
        write_file(&storage, "model.index", b"old");

        storage
            .rename(Path::new(".model.index.tmp"), Path::new("model.index"))
            .unwrap();

        assert!(!storage.exists(Path::new(".model.index.tmp")).unwrap());
        assert_eq!(storage.read_file(Path::new("model.index")).unwrap(), b"new");
    }

    #[test]
    fn test_rename_creates_parent_dirs() {
        let (storage, _temp) = create_test_storage();
        write_file(&storage, "src.bin", b"data");

        storage
            .rename(Path::new("src.bin"), Path::new("nested/deeper/dst.bin"))
            .unwrap();
        assert!(storage.exists(Path::new("nested/deeper/dst.bin")).unwrap());
    }

    #[test]
    fn test_rename_not_found() {
        let (storage, _temp) = create_test_storage();
        let result = storage.rename(Path::new("missing"), Path::new("dst"));
        assert!(matches!(result, Err(BundleError::Storage { .. })));
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let (storage, temp) = create_test_storage();
        write_file(&storage, "a/b/c.bin", b"data");
        assert!(temp.path().join("a/b/c.bin").exists());
    }

    #[test]
    fn test_absolute_paths_bypass_base() {
        let (storage, _temp) = create_test_storage();
        let other = TempDir::new().unwrap();
        let absolute = other.path().join("abs.bin");

        let mut writer = storage.open_write(&absolute).unwrap();
        writer.write_all(b"abs").unwrap();
        writer.finish().unwrap();

        assert!(absolute.exists());
        assert_eq!(storage.read_file(&absolute).unwrap(), b"abs");
    }

    #[test]
    fn test_object_safety() {
        let (storage, _temp) = create_test_storage();
        let backend: std::sync::Arc<dyn StorageBackend> = std::sync::Arc::new(storage);
        assert!(!backend.exists(Path::new("nothing")).unwrap());
    }
}
