// rust/tfbundle-core/src/storage/traits.rs

//! Storage abstraction used by the checkpoint reader and writer.

use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// A handle for random-access reads.
pub trait StorageReader: Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Reads `length` bytes starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the range is out of bounds.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;

    /// Reads the whole object.
    fn read_all(&mut self) -> Result<Vec<u8>> {
        let size = self.size() as usize;
        self.read_range(0, size)
    }
}

/// A handle for writing to storage.
pub trait StorageWriter: Write + Send {
    /// Flushes and persists the written bytes. Must be called to complete
    /// the write.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Operations a storage backend must support.
///
/// This trait is object-safe and is shared as `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Opens an object for reading.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Opens an object for writing, truncating any existing object.
    /// Parent directories are created if they don't exist.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;

    /// Deletes an object.
    fn delete(&self, path: &Path) -> Result<()>;

    /// Renames an object, replacing the destination if it exists.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Creates a directory and all parent directories.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Reads a whole object into memory.
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.open_read(path)?.read_all()
    }
}
