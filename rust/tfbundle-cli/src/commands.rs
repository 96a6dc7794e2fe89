//! Subcommand implementations.
//!
//! Output goes to the supplied writer so the commands can be exercised in
//! tests; diagnostics go through `tracing`.

use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};

use tfbundle_core::format::Endianness;
use tfbundle_core::{is_archive, BundleConfig, CheckpointFetcher, CheckpointReader, DataType};

type CommandResult<T> = Result<T, Box<dyn Error>>;

/// Outcome of [`verify`].
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub total: usize,
    /// Tensor name and error message for every tensor that failed to load.
    pub failed: Vec<(String, String)>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

fn format_shape(shape: &[i64]) -> String {
    let dims: Vec<String> = shape.iter().map(i64::to_string).collect();
    format!("[{}]", dims.join(", "))
}

/// Prints the header and one line per tensor.
pub fn inspect(base: &Path, config: &BundleConfig, out: &mut impl Write) -> CommandResult<()> {
    let reader = CheckpointReader::open_local(base, config)?;
    let header = reader.header();

    let endianness = Endianness::try_from(header.endianness)
        .map(|e| format!("{e:?}").to_lowercase())
        .unwrap_or_else(|_| format!("unknown ({})", header.endianness));
    writeln!(out, "checkpoint: {}", base.display())?;
    writeln!(out, "shards:     {}", header.num_shards)?;
    writeln!(out, "endianness: {endianness}")?;
    if let Some(version) = &header.version {
        writeln!(out, "producer:   {}", version.producer)?;
    }
    writeln!(out, "tensors:    {}", reader.tensor_count())?;
    writeln!(out)?;

    let names: Vec<&str> = reader.tensor_names().collect();
    let width = names.iter().map(|n| n.len()).max().unwrap_or(0).max(4);
    writeln!(out, "{:<width$}  {:<10}  {:<16}  {:>5}  {:>12}  {:>12}", "name", "dtype", "shape", "shard", "offset", "size")?;
    for name in names {
        let entry = reader.metadata(name)?;
        let dtype = DataType::try_from(entry.dtype)
            .map(DataType::name)
            .unwrap_or("unknown");
        writeln!(
            out,
            "{:<width$}  {:<10}  {:<16}  {:>5}  {:>12}  {:>12}",
            name,
            dtype,
            format_shape(&entry.shape_dims()),
            entry.shard_id,
            entry.offset,
            entry.size
        )?;
    }
    Ok(())
}

/// Loads every tensor with CRC verification enabled.
///
/// Failures of individual tensors are collected in the report rather than
/// stopping the run; only a checkpoint that cannot be opened is an error.
pub fn verify(base: &Path, config: &BundleConfig, out: &mut impl Write) -> CommandResult<VerifyReport> {
    let mut reader = CheckpointReader::open_local(base, config)?;
    reader.set_crc_verification(true);

    let names: Vec<String> = reader.tensor_names().map(str::to_string).collect();
    let mut report = VerifyReport {
        total: names.len(),
        failed: Vec::new(),
    };
    for name in names {
        match reader.load_tensor(&name) {
            Ok(tensor) => {
                tracing::debug!(tensor = %name, bytes = tensor.bytes.len(), "verified");
            }
            Err(e) => {
                writeln!(out, "FAILED {name}: {e}")?;
                report.failed.push((name, e.to_string()));
            }
        }
    }

    writeln!(
        out,
        "{} of {} tensors verified",
        report.total - report.failed.len(),
        report.total
    )?;
    Ok(report)
}

/// Downloads a remote checkpoint and returns its local base path. Archive
/// URLs are unpacked into the cache; `additional_files` apply to plain
/// checkpoints only.
pub async fn fetch(
    url: &str,
    model_name: &str,
    additional_files: &[String],
    config: &BundleConfig,
) -> CommandResult<PathBuf> {
    let fetcher = CheckpointFetcher::for_url(url, &config.fetch)?;
    if is_archive(url) {
        return Ok(fetcher.fetch_archive(model_name).await?);
    }
    let files: Vec<&str> = additional_files.iter().map(String::as_str).collect();
    let base = fetcher.fetch(model_name, &files).await?;
    Ok(base)
}
