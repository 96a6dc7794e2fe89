// rust/tfbundle-core/src/checkpoint/archive.rs

//! Checkpoints packaged as a single archive.
//!
//! An archive is unpacked into a directory and the first `*.index` file
//! found there (hidden files skipped, names visited in sorted order) names
//! the checkpoint base. A directory that already holds an index is used as
//! is, so an archive is only unpacked once.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::error::{BundleError, Result};

/// Archive formats recognized by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// `.tar.gz`, `.tgz` and `.gz`
    TarGz,
    Tar,
    Zip,
}

impl ArchiveKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".gz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Whether a path or URL names an archive rather than a checkpoint base.
pub fn is_archive(location: &str) -> bool {
    ArchiveKind::from_name(location).is_some()
}

/// Unpacks `archive` into `destination`. Entries that would land outside
/// `destination` are skipped.
pub fn extract_archive(archive: &Path, destination: &Path) -> Result<()> {
    let kind = archive
        .file_name()
        .and_then(|name| ArchiveKind::from_name(&name.to_string_lossy()))
        .ok_or_else(|| BundleError::storage(archive, "not a recognized archive"))?;

    std::fs::create_dir_all(destination).map_err(|e| {
        BundleError::storage_with_source(destination, "failed to create extraction directory", e)
    })?;
    let file = File::open(archive)
        .map_err(|e| BundleError::storage_with_source(archive, "failed to open archive", e))?;
    let unpack_error =
        |e: std::io::Error| BundleError::storage_with_source(archive, "failed to unpack archive", e);

    match kind {
        ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(BufReader::new(file)))
            .unpack(destination)
            .map_err(unpack_error)?,
        ArchiveKind::Tar => tar::Archive::new(BufReader::new(file))
            .unpack(destination)
            .map_err(unpack_error)?,
        ArchiveKind::Zip => zip::ZipArchive::new(BufReader::new(file))
            .and_then(|mut zip| zip.extract(destination))
            .map_err(|e| unpack_error(std::io::Error::other(e)))?,
    }

    info!(archive = %archive.display(), destination = %destination.display(), ?kind, "unpacked archive");
    Ok(())
}

/// Base path of the first checkpoint index under `directory`, or `None`
/// when there is none (or the directory does not exist).
pub fn find_checkpoint_base(directory: &Path) -> Result<Option<PathBuf>> {
    let entries = match std::fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(BundleError::storage_with_source(
                directory,
                "failed to list directory",
                e,
            ))
        }
    };

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| BundleError::storage_with_source(directory, "failed to list directory", e))?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
            paths.push(entry.path());
        }
    }
    paths.sort();

    for path in paths {
        if path.is_dir() {
            if let Some(base) = find_checkpoint_base(&path)? {
                return Ok(Some(base));
            }
        } else if path.extension().is_some_and(|ext| ext == "index") {
            return Ok(Some(path.with_extension("")));
        }
    }
    Ok(None)
}

/// Unpacks `archive` into `target_dir` unless a checkpoint is already there,
/// and returns the checkpoint base.
pub fn extract_checkpoint_archive(archive: &Path, target_dir: &Path) -> Result<PathBuf> {
    if let Some(base) = find_checkpoint_base(target_dir)? {
        debug!(base = %base.display(), "using previously extracted checkpoint");
        return Ok(base);
    }

    extract_archive(archive, target_dir)?;
    find_checkpoint_base(target_dir)?
        .ok_or_else(|| BundleError::storage(archive, "archive contains no checkpoint index"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::reader::tests::two_shard_files;
    use crate::checkpoint::CheckpointReader;
    use crate::config::BundleConfig;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    /// A gzipped tarball holding the two-shard `model` checkpoint under
    /// `gpt2/`, preceded by a hidden index that must be ignored.
    pub(crate) fn checkpoint_tarball() -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut files = vec![("gpt2/._model.index".to_string(), b"junk".to_vec())];
        files.extend(
            two_shard_files()
                .into_iter()
                .map(|(name, bytes)| (format!("gpt2/{name}"), bytes)),
        );
        for (name, bytes) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, bytes.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_archive_kinds() {
        assert_eq!(ArchiveKind::from_name("model.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_name("https://host/m/model.TGZ"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_name("model.tar"), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::from_name("model.zip"), Some(ArchiveKind::Zip));
        assert!(!is_archive("checkpoints/model.ckpt"));
        assert!(!is_archive("model.index"));
    }

    #[test]
    fn test_extract_tarball_and_open() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("gpt2.tar.gz");
        std::fs::write(&archive, checkpoint_tarball()).unwrap();

        let target = dir.path().join("cache/gpt2");
        let base = extract_checkpoint_archive(&archive, &target).unwrap();
        assert_eq!(base, target.join("gpt2/model"));

        let mut reader = CheckpointReader::open_local(&base, &BundleConfig::default()).unwrap();
        assert_eq!(reader.load_tensor("b").unwrap().to_f32().unwrap(), vec![7.0]);
    }

    #[test]
    fn test_existing_checkpoint_skips_extraction() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("extracted");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("model.index"), b"").unwrap();

        // The archive does not exist, so any extraction attempt would fail.
        let base = extract_checkpoint_archive(&dir.path().join("missing.tgz"), &target).unwrap();
        assert_eq!(base, target.join("model"));
    }

    #[test]
    fn test_archive_without_index() {
        let dir = TempDir::new().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        builder.append_data(&mut header, "readme.txt", &b"hi"[..]).unwrap();
        let archive = dir.path().join("empty.tar");
        std::fs::write(&archive, builder.into_inner().unwrap()).unwrap();

        assert!(matches!(
            extract_checkpoint_archive(&archive, &dir.path().join("out")).unwrap_err(),
            BundleError::Storage { .. }
        ));
    }

    #[test]
    fn test_extract_zip() {
        let dir = TempDir::new().unwrap();
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, bytes) in two_shard_files() {
            writer
                .start_file(name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(&bytes).unwrap();
        }
        let archive = dir.path().join("model.zip");
        std::fs::write(&archive, writer.finish().unwrap().into_inner()).unwrap();

        let base = extract_checkpoint_archive(&archive, &dir.path().join("out")).unwrap();
        assert_eq!(base, dir.path().join("out/model"));
        assert!(dir.path().join("out/model.data-00001-of-00002").exists());
    }

    #[test]
    fn test_find_base_in_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(find_checkpoint_base(&dir.path().join("nope")).unwrap(), None);
    }
}
