// rust/tfbundle-core/src/lib.rs

//! TensorFlow v2 checkpoint (tensor bundle) library.
//!
//! This crate reads and writes the `.index` / `.data-NNNNN-of-NNNNN` file
//! pairs produced by TensorFlow's checkpoint saver, maps model parameter
//! trees to flat tensor names, and downloads remote checkpoints into a
//! local cache.

pub mod config;
pub mod error;
pub mod format;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::BundleConfig;
pub use error::{BundleError, Result};
pub use storage::{LocalStorage, StorageBackend, StorageReader, StorageWriter};

pub mod checkpoint;
pub use checkpoint::{
    is_archive, CheckpointLocation, CheckpointReader, CheckpointWriter, TensorData,
};
#[cfg(feature = "remote")]
pub use checkpoint::CheckpointFetcher;

pub mod params;
pub use params::{assign, flatten, tensor_names, FlattenOptions, NameMap, NamedParameters};

pub use format::DataType;
