// rust/tfbundle-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BundleError {

    #[error("Buffer truncated while reading {context}: needed {needed} bytes at offset {offset}, {available} available")]
    TruncatedBuffer {
        context: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Malformed varint at offset {offset}")]
    MalformedVarint {
        offset: usize,
    },

    #[error("Shared key bytes of {shared} exceeded stored prefix size of {prefix_len}")]
    InvalidPrefixCompression {
        shared: usize,
        prefix_len: usize,
    },

    #[error("Tensor '{name}' had a bad CRC: expected {expected:#010x}, read {actual:#010x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("Unsupported block compression type {block_type}")]
    UnsupportedCompression {
        block_type: u8,
    },

    #[error("Corrupt index entry '{key}': {message}")]
    CorruptEntry {
        key: String,
        message: String,
        #[source]
        source: Option<prost::DecodeError>,
    },

    #[error("Corrupt data: {message}")]
    CorruptData {
        message: String,
    },

    #[error("Bad table magic number: {found:#018x}")]
    BadMagic {
        found: u64,
    },

    #[error("No tensor named '{name}' exists")]
    TensorNotFound {
        name: String,
    },

    #[error("Invalid tensor '{name}': {message}")]
    InvalidTensor {
        name: String,
        message: String,
    },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Download of '{location}' failed: {message}")]
    Download {
        location: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type Result<T> = std::result::Result<T, BundleError>;

// Convenience constructors
impl BundleError {

    pub fn truncated(context: &'static str, offset: usize, needed: usize, available: usize) -> Self {
        Self::TruncatedBuffer {
            context,
            offset,
            needed,
            available,
        }
    }

    pub fn corrupt_entry(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptEntry {
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn corrupt_entry_with_source(
        key: impl Into<String>,
        message: impl Into<String>,
        source: prost::DecodeError,
    ) -> Self {
        Self::CorruptEntry {
            key: key.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn corrupt_data(message: impl Into<String>) -> Self {
        Self::CorruptData {
            message: message.into(),
        }
    }

    pub fn tensor_not_found(name: impl Into<String>) -> Self {
        Self::TensorNotFound { name: name.into() }
    }

    pub fn invalid_tensor(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTensor {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn download(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            location: location.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn download_with_source(
        location: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Download {
            location: location.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
