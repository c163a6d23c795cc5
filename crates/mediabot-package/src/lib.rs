#![forbid(unsafe_code)]

//! Package assembly for processed jobs.
//!
//! The packager creates `<outputRoot>/<jobId>/`, moves the categorised
//! file set into it (samples under `Samples/`), computes MD5 and SHA-256
//! for every moved file in a single streamed pass, and writes a
//! pretty-printed `manifest.json`. Any move or digest failure aborts the
//! step; partially-moved files stay where they landed, and the driver
//! records the failure.
//!
//! A file already sitting at its destination is accepted as moved, so
//! re-running the packager over identical inputs produces an identical
//! manifest.

mod digest;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use mediabot_model::{FileKind, ManifestFile, PackageManifest};
use thiserror::Error;
use tracing::info;

pub use digest::{FileDigests, digest_file};

/// Subdirectory sample cuts are placed under.
pub const SAMPLES_DIR: &str = "Samples";
/// Manifest filename written into every package.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Result alias for packaging operations.
pub type PackageResult<T> = Result<T, PackageError>;

/// Failures raised while assembling a package.
#[derive(Debug, Error)]
pub enum PackageError {
    /// Filesystem failure while preparing or moving.
    #[error("package io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// An input file is missing and not already at its destination.
    #[error("package input missing")]
    MissingInput {
        /// The absent path.
        path: PathBuf,
    },
    /// Manifest serialisation failure.
    #[error("package manifest encode failure")]
    Encode {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

impl PackageError {
    fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Categorised file set to package for one job.
#[derive(Debug, Clone, Default)]
pub struct PackageSet {
    /// Primary video payload.
    pub video: Option<PathBuf>,
    /// Audio tracks.
    pub audios: Vec<PathBuf>,
    /// Subtitle files.
    pub subtitles: Vec<PathBuf>,
    /// Sample cuts, placed under [`SAMPLES_DIR`].
    pub samples: Vec<PathBuf>,
    /// Uncategorised extras, typed by extension.
    pub extras: Vec<PathBuf>,
}

/// A finished package on disk.
#[derive(Debug, Clone)]
pub struct PackagedOutput {
    /// The package directory, `<outputRoot>/<jobId>/`.
    pub directory: PathBuf,
    /// Absolute path of the written manifest.
    pub manifest_path: PathBuf,
    /// The manifest document.
    pub manifest: PackageManifest,
}

/// Assemble the package directory for a job.
///
/// # Errors
///
/// Returns an error on the first failed move, digest, or manifest write;
/// files moved before the failure remain in place.
pub fn package(
    job_id: &str,
    set: &PackageSet,
    output_root: &Path,
    metadata: serde_json::Map<String, serde_json::Value>,
) -> PackageResult<PackagedOutput> {
    let directory = output_root.join(job_id);
    fs::create_dir_all(&directory)
        .map_err(|source| PackageError::io("package.create_dir", &directory, source))?;
    let samples_dir = directory.join(SAMPLES_DIR);
    if !set.samples.is_empty() {
        fs::create_dir_all(&samples_dir)
            .map_err(|source| PackageError::io("package.create_samples_dir", &samples_dir, source))?;
    }

    let mut files = Vec::new();
    let mut total_size = 0u64;

    let mut place = |source: &Path, kind: FileKind, in_samples: bool| -> PackageResult<()> {
        let name = file_name(source)?;
        let (destination, manifest_name) = if in_samples {
            (samples_dir.join(&name), format!("{SAMPLES_DIR}/{name}"))
        } else {
            (directory.join(&name), name)
        };
        move_into_place(source, &destination)?;
        let digests = digest_file(&destination)
            .map_err(|source_err| PackageError::io("package.digest", &destination, source_err))?;
        total_size += digests.size;
        files.push(ManifestFile {
            filename: manifest_name,
            size: digests.size,
            md5: digests.md5,
            sha256: digests.sha256,
            kind,
        });
        Ok(())
    };

    if let Some(video) = &set.video {
        place(video, FileKind::Video, false)?;
    }
    for audio in sorted(&set.audios) {
        place(&audio, FileKind::Audio, false)?;
    }
    for subtitle in sorted(&set.subtitles) {
        place(&subtitle, FileKind::Subtitle, false)?;
    }
    for sample in sorted(&set.samples) {
        place(&sample, FileKind::Sample, true)?;
    }
    for extra in sorted(&set.extras) {
        let kind = FileKind::from_extension(extra.extension().and_then(|ext| ext.to_str()));
        place(&extra, kind, false)?;
    }

    let manifest = PackageManifest {
        job_id: job_id.to_string(),
        created_at: Utc::now(),
        files,
        total_size,
        metadata,
    };

    let manifest_path = directory.join(MANIFEST_NAME);
    let serialised = serde_json::to_string_pretty(&manifest)
        .map_err(|source| PackageError::Encode { source })?;
    fs::write(&manifest_path, serialised)
        .map_err(|source| PackageError::io("package.write_manifest", &manifest_path, source))?;

    info!(
        job_id,
        files = manifest.files.len(),
        total_size = manifest.total_size,
        "package assembled"
    );

    Ok(PackagedOutput {
        directory,
        manifest_path,
        manifest,
    })
}

fn sorted(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = paths.to_vec();
    out.sort();
    out
}

fn file_name(path: &Path) -> PackageResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| PackageError::MissingInput {
            path: path.to_path_buf(),
        })
}

/// Move a file into the package, tolerating a source that was already
/// moved on a previous run.
fn move_into_place(source: &Path, destination: &Path) -> PackageResult<()> {
    if !source.exists() {
        if destination.exists() {
            return Ok(());
        }
        return Err(PackageError::MissingInput {
            path: source.to_path_buf(),
        });
    }
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_rename_err) => {
            // Cross-device moves fall back to copy + remove.
            fs::copy(source, destination)
                .map_err(|source_err| PackageError::io("package.copy", destination, source_err))?;
            fs::remove_file(source)
                .map_err(|source_err| PackageError::io("package.remove_source", source, source_err))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).expect("create");
        file.write_all(contents).expect("write");
        path
    }

    #[test]
    fn packages_video_and_sample_with_manifest() {
        let staging = TempDir::new().expect("staging");
        let output = TempDir::new().expect("output");
        let video = write_file(staging.path(), "a.mkv", b"video-bytes");
        let sample = write_file(staging.path(), "s1.mkv", b"sample");

        let set = PackageSet {
            video: Some(video),
            samples: vec![sample],
            ..PackageSet::default()
        };
        let packaged =
            package("job-1", &set, output.path(), serde_json::Map::new()).expect("package");

        assert!(packaged.directory.join("a.mkv").is_file());
        assert!(packaged.directory.join("Samples/s1.mkv").is_file());
        assert!(packaged.manifest_path.is_file());

        let manifest = &packaged.manifest;
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[0].filename, "a.mkv");
        assert_eq!(manifest.files[0].kind, FileKind::Video);
        assert_eq!(manifest.files[1].filename, "Samples/s1.mkv");
        assert_eq!(manifest.files[1].kind, FileKind::Sample);
        assert_eq!(
            manifest.total_size,
            manifest.files.iter().map(|file| file.size).sum::<u64>()
        );
        assert_eq!(manifest.total_size, 11 + 6);
    }

    #[test]
    fn manifest_hashes_match_on_disk_bytes() {
        let staging = TempDir::new().expect("staging");
        let output = TempDir::new().expect("output");
        let video = write_file(staging.path(), "a.mkv", b"hello\n");
        let set = PackageSet {
            video: Some(video),
            ..PackageSet::default()
        };
        let packaged =
            package("job-1", &set, output.path(), serde_json::Map::new()).expect("package");
        let entry = &packaged.manifest.files[0];
        let recomputed = digest_file(&packaged.directory.join("a.mkv")).expect("digest");
        assert_eq!(entry.sha256, recomputed.sha256);
        assert_eq!(entry.md5, recomputed.md5);
        assert_eq!(
            entry.sha256,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn rerun_over_identical_inputs_is_idempotent() {
        let staging = TempDir::new().expect("staging");
        let output = TempDir::new().expect("output");
        let video = write_file(staging.path(), "a.mkv", b"payload");
        let set = PackageSet {
            video: Some(video),
            ..PackageSet::default()
        };
        let first = package("job-1", &set, output.path(), serde_json::Map::new()).expect("first");
        // Sources are gone now; the second run must accept the already
        // placed files and reproduce the same manifest content.
        let second = package("job-1", &set, output.path(), serde_json::Map::new()).expect("second");
        assert_eq!(first.manifest.files, second.manifest.files);
        assert_eq!(first.manifest.total_size, second.manifest.total_size);
    }

    #[test]
    fn missing_input_aborts() {
        let output = TempDir::new().expect("output");
        let set = PackageSet {
            video: Some(PathBuf::from("/nonexistent/a.mkv")),
            ..PackageSet::default()
        };
        let err = package("job-1", &set, output.path(), serde_json::Map::new())
            .expect_err("must fail");
        assert!(matches!(err, PackageError::MissingInput { .. }));
    }

    #[test]
    fn extras_are_typed_by_extension() {
        let staging = TempDir::new().expect("staging");
        let output = TempDir::new().expect("output");
        let nfo = write_file(staging.path(), "release.nfo", b"info");
        let set = PackageSet {
            extras: vec![nfo],
            ..PackageSet::default()
        };
        let packaged =
            package("job-1", &set, output.path(), serde_json::Map::new()).expect("package");
        assert_eq!(packaged.manifest.files[0].kind, FileKind::Nfo);
    }
}
