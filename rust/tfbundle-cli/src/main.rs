//! TensorFlow checkpoint command line tool
//!
//! Inspects, verifies and downloads TensorFlow v2 checkpoints.
//!
//! # Usage
//!
//! ```bash
//! # List the tensors of a local checkpoint
//! tfbundle inspect ./gpt2/model.ckpt
//!
//! # Load every tensor and check its CRC
//! tfbundle verify ./gpt2/model.ckpt
//!
//! # Download a remote checkpoint into the cache
//! tfbundle fetch https://example.com/models/gpt2/model.ckpt --model-name gpt2
//!
//! # Use a configuration file
//! tfbundle --config tfbundle.toml verify ./gpt2/model.ckpt
//! ```

mod commands;

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tfbundle_core::BundleConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// TensorFlow v2 checkpoint tool
#[derive(Parser, Debug)]
#[command(name = "tfbundle")]
#[command(about = "Inspect, verify and fetch TensorFlow v2 checkpoints")]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header and tensor table of a checkpoint
    Inspect {
        /// Checkpoint base path (without `.index`)
        base: PathBuf,
    },
    /// Load every tensor of a checkpoint and verify its checksum
    Verify {
        /// Checkpoint base path (without `.index`)
        base: PathBuf,
    },
    /// Download a remote checkpoint into the local cache
    Fetch {
        /// Checkpoint URL (http://, https:// or s3://) ending in the base name
        /// or in an archive name (.tar.gz, .tgz, .tar, .zip)
        url: String,

        /// Cache subdirectory for this model
        #[arg(long)]
        model_name: String,

        /// Cache root directory, overriding the configuration
        #[arg(long)]
        cache_root: Option<PathBuf>,

        /// Extra files stored next to the checkpoint
        #[arg(long = "additional-file")]
        additional_files: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &args.config {
        Some(path) => BundleConfig::from_file(path)?,
        None => BundleConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;

    let mut stdout = std::io::stdout().lock();
    match args.command {
        Command::Inspect { base } => commands::inspect(&base, &config, &mut stdout)?,
        Command::Verify { base } => {
            let report = commands::verify(&base, &config, &mut stdout)?;
            if !report.is_ok() {
                tracing::error!(
                    failed = report.failed.len(),
                    total = report.total,
                    "checkpoint verification failed"
                );
                std::process::exit(1);
            }
        }
        Command::Fetch {
            url,
            model_name,
            cache_root,
            additional_files,
        } => {
            let mut config = config;
            if let Some(root) = cache_root {
                config.fetch.cache_root = root;
            }
            let base = commands::fetch(&url, &model_name, &additional_files, &config).await?;
            writeln!(stdout, "{}", base.display())?;
        }
    }

    Ok(())
}
