// rust/tfbundle-core/src/config.rs

//! Configuration for checkpoint reading, writing and remote fetching.
//!
//! Values come from TOML files, `TFB_*` environment variable overrides and
//! the defaults below, and are checked by [`BundleConfig::validate`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{BundleError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    pub storage: StorageConfig,
    pub reader: ReaderConfig,
    pub writer: WriterConfig,
    pub fetch: FetchConfig,
}

// Local file access options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Directory that relative paths are resolved against.
    pub base_path: PathBuf,
    // Buffer size in bytes for buffered reads and writes.
    pub buffer_size: usize,
    // Whether to memory-map large files.
    pub use_mmap: bool,
    // File size (bytes) at or above which files are memory-mapped.
    pub mmap_threshold: u64,
}

/// Options applied when opening a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Verify the stored CRC-32C of every tensor that is loaded.
    pub verify_crc: bool,
    /// Verify the checksum trailer of every index block.
    pub verify_block_checksums: bool,
}

/// Options applied when writing a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Records between full-key restart points in the index block.
    pub block_restart_interval: usize,
    /// Write through a temporary file and rename into place.
    pub atomic_writes: bool,
}

/// Options for downloading remote checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Directory that holds one subdirectory per downloaded model.
    pub cache_root: PathBuf,
    /// Maximum number of retries for a failed download.
    pub max_retries: u32,
    /// Initial delay (milliseconds) between retries.
    pub retry_delay_ms: u64,
    /// Maximum delay (milliseconds) between retries.
    pub max_retry_delay_ms: u64,
    /// Time limit (milliseconds) for one download attempt.
    pub timeout_ms: u64,
    /// Files downloaded at the same time.
    pub max_concurrent_downloads: usize,
    /// AWS region for `s3://` locations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack, etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_endpoint: Option<String>,
    /// Whether to allow plain HTTP for S3-compatible endpoints.
    pub allow_http: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024,      // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            verify_crc: true,
            verify_block_checksums: true,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            block_restart_interval: 15,
            atomic_writes: true,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            cache_root: std::env::temp_dir().join("tfbundle"),
            max_retries: 5,
            retry_delay_ms: 100,
            max_retry_delay_ms: 30_000,
            timeout_ms: 60_000,
            max_concurrent_downloads: 4,
            s3_region: None,
            s3_endpoint: None,
            allow_http: false,
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(BundleError::config(
                "fetch.max_concurrent_downloads must be greater than 0",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(BundleError::config("fetch.timeout_ms must be greater than 0"));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(BundleError::config(
                "fetch.max_retry_delay_ms must be >= fetch.retry_delay_ms",
            ));
        }
        if self.cache_root.as_os_str().is_empty() {
            return Err(BundleError::config("fetch.cache_root cannot be empty"));
        }
        Ok(())
    }
}

impl FromStr for BundleConfig {
    type Err = BundleError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| BundleError::config_with_source("failed to parse TOML config", e))
    }
}

impl BundleConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BundleError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Variables are prefixed with `TFB_` followed by the section and field:
    // - `TFB_STORAGE_USE_MMAP` overrides `storage.use_mmap`
    // - `TFB_READER_VERIFY_CRC` overrides `reader.verify_crc`
    // - `TFB_WRITER_BLOCK_RESTART_INTERVAL` overrides `writer.block_restart_interval`
    // - `TFB_FETCH_CACHE_ROOT` overrides `fetch.cache_root`
    //
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        // Storage overrides
        if let Ok(val) = std::env::var("TFB_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TFB_STORAGE_BUFFER_SIZE") {
            if let Ok(v) = val.parse() {
                self.storage.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_STORAGE_USE_MMAP") {
            if let Ok(v) = val.parse() {
                self.storage.use_mmap = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_STORAGE_MMAP_THRESHOLD") {
            if let Ok(v) = val.parse() {
                self.storage.mmap_threshold = v;
            }
        }

        // Reader overrides
        if let Ok(val) = std::env::var("TFB_READER_VERIFY_CRC") {
            if let Ok(v) = val.parse() {
                self.reader.verify_crc = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_READER_VERIFY_BLOCK_CHECKSUMS") {
            if let Ok(v) = val.parse() {
                self.reader.verify_block_checksums = v;
            }
        }

        // Writer overrides
        if let Ok(val) = std::env::var("TFB_WRITER_BLOCK_RESTART_INTERVAL") {
            if let Ok(v) = val.parse() {
                self.writer.block_restart_interval = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_WRITER_ATOMIC_WRITES") {
            if let Ok(v) = val.parse() {
                self.writer.atomic_writes = v;
            }
        }

        // Fetch overrides
        if let Ok(val) = std::env::var("TFB_FETCH_CACHE_ROOT") {
            self.fetch.cache_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("TFB_FETCH_MAX_RETRIES") {
            if let Ok(v) = val.parse() {
                self.fetch.max_retries = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_FETCH_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.fetch.retry_delay_ms = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_FETCH_MAX_RETRY_DELAY_MS") {
            if let Ok(v) = val.parse() {
                self.fetch.max_retry_delay_ms = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_FETCH_TIMEOUT_MS") {
            if let Ok(v) = val.parse() {
                self.fetch.timeout_ms = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_FETCH_MAX_CONCURRENT_DOWNLOADS") {
            if let Ok(v) = val.parse() {
                self.fetch.max_concurrent_downloads = v;
            }
        }
        if let Ok(val) = std::env::var("TFB_FETCH_S3_REGION") {
            self.fetch.s3_region = Some(val);
        }
        if let Ok(val) = std::env::var("TFB_FETCH_S3_ENDPOINT") {
            self.fetch.s3_endpoint = Some(val);
        }
        if let Ok(val) = std::env::var("TFB_FETCH_ALLOW_HTTP") {
            if let Ok(v) = val.parse() {
                self.fetch.allow_http = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(BundleError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        if self.writer.block_restart_interval == 0 {
            return Err(BundleError::config(
                "writer.block_restart_interval must be greater than 0",
            ));
        }

        self.fetch.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = BundleConfig::default();

        assert_eq!(config.storage.buffer_size, 64 * 1024);
        assert!(config.storage.use_mmap);
        assert_eq!(config.storage.mmap_threshold, 1024 * 1024);

        assert!(config.reader.verify_crc);
        assert!(config.reader.verify_block_checksums);

        assert_eq!(config.writer.block_restart_interval, 15);
        assert!(config.writer.atomic_writes);

        assert!(config.fetch.cache_root.ends_with("tfbundle"));
        assert_eq!(config.fetch.max_retries, 5);
        assert_eq!(config.fetch.retry_delay_ms, 100);
        assert_eq!(config.fetch.max_retry_delay_ms, 30_000);
        assert_eq!(config.fetch.timeout_ms, 60_000);
        assert_eq!(config.fetch.max_concurrent_downloads, 4);
    }

    #[test]
    fn test_default_validates() {
        assert!(BundleConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_str_empty() {
        let config: BundleConfig = "".parse().unwrap();
        assert_eq!(config.writer.block_restart_interval, 15);
    }

    #[test]
    fn test_from_str_partial() {
        let toml = r#"
            [reader]
            verify_crc = false

            [fetch]
            cache_root = "/var/cache/models"
            max_concurrent_downloads = 8
        "#;

        let config: BundleConfig = toml.parse().unwrap();
        assert!(!config.reader.verify_crc);
        assert!(config.reader.verify_block_checksums);
        assert_eq!(config.fetch.cache_root, PathBuf::from("/var/cache/models"));
        assert_eq!(config.fetch.max_concurrent_downloads, 8);
        assert_eq!(config.fetch.max_retries, 5);
    }

    #[test]
    fn test_from_str_invalid_toml() {
        let result: Result<BundleConfig> = "[writer\natomic_writes = ".parse();
        assert!(matches!(result, Err(BundleError::Config { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[writer]\nblock_restart_interval = 4").unwrap();

        let config = BundleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.writer.block_restart_interval, 4);
    }

    #[test]
    fn test_from_file_not_found() {
        let result = BundleConfig::from_file("/nonexistent/tfbundle.toml");
        assert!(matches!(result, Err(BundleError::Storage { .. })));
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[writer]\nblock_restart_interval = 0").unwrap();
        assert!(BundleConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_validate_invalid_buffer_size() {
        let mut config = BundleConfig::default();
        config.storage.buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_concurrency() {
        let mut config = BundleConfig::default();
        config.fetch.max_concurrent_downloads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_retry_delays() {
        let mut config = BundleConfig::default();
        config.fetch.retry_delay_ms = 1_000;
        config.fetch.max_retry_delay_ms = 10;
        assert!(config.validate().is_err());
    }

    // Helper to clear all TFB_ environment variables for test isolation
    fn clear_tfb_env_vars() {
        for (key, _) in std::env::vars() {
            if key.starts_with("TFB_") {
                std::env::remove_var(&key);
            }
        }
    }

    // Env vars are process-global, so all override cases share one test.
    #[test]
    fn test_env_overrides() {
        clear_tfb_env_vars();

        std::env::set_var("TFB_STORAGE_USE_MMAP", "false");
        std::env::set_var("TFB_READER_VERIFY_CRC", "false");
        std::env::set_var("TFB_WRITER_BLOCK_RESTART_INTERVAL", "16");
        std::env::set_var("TFB_FETCH_CACHE_ROOT", "/env/cache");
        std::env::set_var("TFB_FETCH_S3_REGION", "eu-west-1");

        let config = BundleConfig::default().with_env_overrides();

        assert!(!config.storage.use_mmap);
        assert!(!config.reader.verify_crc);
        assert_eq!(config.writer.block_restart_interval, 16);
        assert_eq!(config.fetch.cache_root, PathBuf::from("/env/cache"));
        assert_eq!(config.fetch.s3_region.as_deref(), Some("eu-west-1"));

        clear_tfb_env_vars();

        // Unparseable values keep the defaults
        std::env::set_var("TFB_FETCH_MAX_RETRIES", "many");
        let config = BundleConfig::default().with_env_overrides();
        assert_eq!(config.fetch.max_retries, 5);

        clear_tfb_env_vars();
    }

    #[test]
    fn test_serialize_roundtrip() {
        let original = BundleConfig::default();
        let toml_str = toml::to_string(&original).unwrap();
        let parsed: BundleConfig = toml_str.parse().unwrap();

        assert_eq!(parsed.storage.buffer_size, original.storage.buffer_size);
        assert_eq!(parsed.fetch.cache_root, original.fetch.cache_root);
        assert_eq!(
            parsed.writer.block_restart_interval,
            original.writer.block_restart_interval
        );
    }
}
