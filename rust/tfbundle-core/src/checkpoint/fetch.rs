// rust/tfbundle-core/src/checkpoint/fetch.rs

//! Downloads remote checkpoints into a local cache directory.
//!
//! Files land in `cache_root/model_name/`. The index is fetched first so its
//! header can tell how many shards exist; shards and auxiliary files are
//! then downloaded concurrently. Files already present are not downloaded
//! again. Archived checkpoints are downloaded whole and unpacked in place.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::http::HttpBuilder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::archive::{extract_checkpoint_archive, find_checkpoint_base};
use super::index_reader::IndexReader;
use super::reader::shard_file_name;
use crate::config::FetchConfig;
use crate::error::{BundleError, Result};
use crate::storage::{retry_async, RetryConfig, RetryResult};

/// Fetches the files of one remote checkpoint.
pub struct CheckpointFetcher {
    store: Arc<dyn ObjectStore>,
    remote_dir: String,
    base_name: String,
    cache_root: PathBuf,
    retry: RetryConfig,
    timeout: Duration,
    max_concurrent: usize,
}

impl CheckpointFetcher {
    /// `remote_dir` is the object prefix holding the checkpoint files and
    /// `base_name` the file name prefix shared by `.index` and the shards.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        remote_dir: impl Into<String>,
        base_name: impl Into<String>,
        cache_root: impl Into<PathBuf>,
        config: &FetchConfig,
    ) -> Self {
        Self {
            store,
            remote_dir: remote_dir.into().trim_matches('/').to_string(),
            base_name: base_name.into(),
            cache_root: cache_root.into(),
            retry: RetryConfig::from(config),
            timeout: Duration::from_millis(config.timeout_ms),
            max_concurrent: config.max_concurrent_downloads.max(1),
        }
    }

    /// Builds a fetcher for an `http://`, `https://` or `s3://` checkpoint
    /// URL whose last path segment is the checkpoint base name.
    pub fn for_url(url: &str, config: &FetchConfig) -> Result<Self> {
        let (parent, base_name) = url
            .rsplit_once('/')
            .filter(|(parent, base)| !base.is_empty() && !parent.ends_with('/'))
            .ok_or_else(|| {
                BundleError::config(format!("checkpoint URL '{url}' has no base name"))
            })?;

        if let Some(rest) = parent.strip_prefix("s3://") {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(region) = &config.s3_region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &config.s3_endpoint {
                builder = builder.with_endpoint(endpoint);
            }
            if config.allow_http {
                builder = builder.with_allow_http(true);
            }
            let store = builder
                .build()
                .map_err(|e| BundleError::config_with_source("failed to build S3 client", e))?;
            return Ok(Self::new(
                Arc::new(store),
                prefix,
                base_name,
                &config.cache_root,
                config,
            ));
        }

        if parent.starts_with("http://") || parent.starts_with("https://") {
            let store = HttpBuilder::new()
                .with_url(parent)
                .build()
                .map_err(|e| BundleError::config_with_source("failed to build HTTP client", e))?;
            return Ok(Self::new(
                Arc::new(store),
                "",
                base_name,
                &config.cache_root,
                config,
            ));
        }

        Err(BundleError::config(format!(
            "unsupported checkpoint URL scheme in '{url}'"
        )))
    }

    /// Overrides the retry policy derived from [`FetchConfig`].
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Downloads the checkpoint and `additional_files` (file names next to
    /// the checkpoint, such as vocabularies) and returns the local base path.
    pub async fn fetch(&self, model_name: &str, additional_files: &[&str]) -> Result<PathBuf> {
        let target_dir = self.cache_root.join(model_name);
        tokio::fs::create_dir_all(&target_dir).await.map_err(|e| {
            BundleError::storage_with_source(&target_dir, "failed to create cache directory", e)
        })?;

        let index_name = format!("{}.index", self.base_name);
        let index_path = target_dir.join(&index_name);
        if tokio::fs::try_exists(&index_path).await.unwrap_or(false) {
            debug!(path = %index_path.display(), "using cached index");
        } else {
            self.download(&index_name, &index_path).await?;
        }

        let index_bytes = tokio::fs::read(&index_path).await.map_err(|e| {
            BundleError::storage_with_source(&index_path, "failed to read downloaded index", e)
        })?;
        let num_shards = IndexReader::from_bytes(&index_bytes)?.read_header()?.num_shards;

        let mut files: Vec<String> = (0..num_shards)
            .map(|shard| {
                shard_file_name(Path::new(&self.base_name), shard, num_shards)
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        files.extend(additional_files.iter().map(|f| f.to_string()));

        let mut pending = Vec::new();
        for name in files {
            let path = target_dir.join(&name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!(path = %path.display(), "using cached file");
            } else {
                pending.push((name, path));
            }
        }

        let downloads = pending.len();
        futures::stream::iter(pending)
            .map(|(name, path)| async move { self.download(&name, &path).await })
            .buffer_unordered(self.max_concurrent)
            .try_collect::<Vec<u64>>()
            .await?;

        info!(
            model = model_name,
            shards = num_shards,
            downloads,
            directory = %target_dir.display(),
            "checkpoint available locally"
        );
        Ok(target_dir.join(&self.base_name))
    }

    /// Treats the base name as an archive: downloads it into
    /// `cache_root/model_name`, unpacks it there and returns the base of the
    /// checkpoint it contains. Nothing is downloaded when that directory
    /// already holds a checkpoint.
    pub async fn fetch_archive(&self, model_name: &str) -> Result<PathBuf> {
        let target_dir = self.cache_root.join(model_name);
        if let Some(base) = find_checkpoint_base(&target_dir)? {
            debug!(base = %base.display(), "using cached checkpoint");
            return Ok(base);
        }

        tokio::fs::create_dir_all(&target_dir).await.map_err(|e| {
            BundleError::storage_with_source(&target_dir, "failed to create cache directory", e)
        })?;
        let archive_path = target_dir.join(&self.base_name);
        if !tokio::fs::try_exists(&archive_path).await.unwrap_or(false) {
            self.download(&self.base_name, &archive_path).await?;
        }

        let base = tokio::task::spawn_blocking({
            let target_dir = target_dir.clone();
            move || extract_checkpoint_archive(&archive_path, &target_dir)
        })
        .await
        .map_err(|e| {
            BundleError::download_with_source(&self.base_name, "archive extraction was interrupted", e)
        })??;

        info!(
            model = model_name,
            base = %base.display(),
            directory = %target_dir.display(),
            "archived checkpoint available locally"
        );
        Ok(base)
    }

    fn remote_path(&self, name: &str) -> ObjectPath {
        if self.remote_dir.is_empty() {
            ObjectPath::from(name)
        } else {
            ObjectPath::from(format!("{}/{name}", self.remote_dir))
        }
    }

    /// Downloads one file through a `.partial` file, retrying transient
    /// failures. Returns the number of bytes written.
    async fn download(&self, name: &str, destination: &Path) -> Result<u64> {
        let location = self.remote_path(name);
        let partial = destination.with_file_name(format!("{name}.partial"));
        let timeout = self.timeout;

        let (location_ref, partial_ref) = (&location, partial.as_path());
        let result = retry_async(&self.retry, || async move {
            match tokio::time::timeout(timeout, self.download_once(location_ref, partial_ref)).await
            {
                Ok(outcome) => outcome,
                Err(_) => RetryResult::Retry(BundleError::download(
                    location_ref.to_string(),
                    format!("attempt timed out after {timeout:?}"),
                )),
            }
        })
        .await;

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&partial, destination).await.map_err(|e| {
                    BundleError::storage_with_source(&partial, "failed to move downloaded file", e)
                })?;
                debug!(file = name, bytes, "downloaded");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %remove_err, "failed to remove partial download");
                    }
                }
                Err(e)
            }
        }
    }

    async fn download_once(&self, location: &ObjectPath, partial: &Path) -> RetryResult<u64, BundleError> {
        let result = match self.store.get(location).await {
            Ok(result) => result,
            Err(e @ object_store::Error::NotFound { .. }) => {
                return RetryResult::Fail(BundleError::download_with_source(
                    location.to_string(),
                    "object not found",
                    e,
                ))
            }
            Err(e) => {
                warn!(location = %location, error = %e, "download request failed");
                return RetryResult::Retry(BundleError::download_with_source(
                    location.to_string(),
                    "request failed",
                    e,
                ));
            }
        };

        let mut file = match tokio::fs::File::create(partial).await {
            Ok(file) => file,
            Err(e) => {
                return RetryResult::Fail(BundleError::storage_with_source(
                    partial,
                    "failed to create partial file",
                    e,
                ))
            }
        };

        let mut stream = result.into_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    return RetryResult::Retry(BundleError::download_with_source(
                        location.to_string(),
                        "connection interrupted",
                        e,
                    ))
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                return RetryResult::Fail(BundleError::storage_with_source(
                    partial,
                    "failed to write partial file",
                    e,
                ));
            }
            written += chunk.len() as u64;
        }

        if let Err(e) = file.sync_all().await {
            return RetryResult::Fail(BundleError::storage_with_source(
                partial,
                "failed to sync partial file",
                e,
            ));
        }
        RetryResult::Ok(written)
    }
}
