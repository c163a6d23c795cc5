//! Package and upload manifests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category assigned to a packaged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Primary video payload.
    Video,
    /// Audio track.
    Audio,
    /// Subtitle file.
    Subtitle,
    /// Preview cut under `Samples/`.
    Sample,
    /// Release info file.
    Nfo,
    /// Anything else shipped alongside the payload.
    Other,
}

impl FileKind {
    /// Guess a kind from a file extension for uncategorised extras.
    #[must_use]
    pub fn from_extension(extension: Option<&str>) -> Self {
        match extension.map(str::to_ascii_lowercase).as_deref() {
            Some("mkv" | "mp4" | "avi" | "m2ts" | "ts" | "webm" | "mov") => Self::Video,
            Some("flac" | "aac" | "ac3" | "eac3" | "dts" | "mka" | "mp3" | "opus" | "wav") => {
                Self::Audio
            }
            Some("srt" | "ass" | "ssa" | "sub" | "sup" | "vtt") => Self::Subtitle,
            Some("nfo") => Self::Nfo,
            _ => Self::Other,
        }
    }
}

/// Per-file manifest entry with cryptographic digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    /// Path relative to the package root (`Samples/<name>` for samples).
    pub filename: String,
    /// Size in bytes.
    pub size: u64,
    /// Lowercase hex MD5 digest.
    pub md5: String,
    /// Lowercase hex SHA-256 digest.
    pub sha256: String,
    /// File category.
    #[serde(rename = "type")]
    pub kind: FileKind,
}

/// The `manifest.json` document written into every package directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    /// Owning job.
    pub job_id: String,
    /// When the package was assembled.
    pub created_at: DateTime<Utc>,
    /// Packaged files in deterministic order (video, audio, subtitles,
    /// samples, extras).
    pub files: Vec<ManifestFile>,
    /// Sum of all file sizes.
    pub total_size: u64,
    /// Caller-supplied metadata, carried verbatim.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Receipt for one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Package-relative filename.
    pub filename: String,
    /// Path at the remote target.
    pub remote_path: String,
    /// Size in bytes.
    pub size: u64,
    /// Target-assigned entity tag, when the target reports one.
    pub etag: Option<String>,
}

/// Package manifest extended with the delivery target and location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadManifest {
    /// The package manifest fields, flattened into this document.
    #[serde(flatten)]
    pub package: PackageManifest,
    /// Name of the target that served the upload.
    pub target: String,
    /// Remote location the package landed at.
    pub location: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_mapping_covers_common_containers() {
        assert_eq!(FileKind::from_extension(Some("MKV")), FileKind::Video);
        assert_eq!(FileKind::from_extension(Some("flac")), FileKind::Audio);
        assert_eq!(FileKind::from_extension(Some("srt")), FileKind::Subtitle);
        assert_eq!(FileKind::from_extension(Some("nfo")), FileKind::Nfo);
        assert_eq!(FileKind::from_extension(Some("txt")), FileKind::Other);
        assert_eq!(FileKind::from_extension(None), FileKind::Other);
    }

    #[test]
    fn upload_manifest_flattens_package_fields() {
        let manifest = UploadManifest {
            package: PackageManifest {
                job_id: "job-1".into(),
                created_at: Utc::now(),
                files: Vec::new(),
                total_size: 0,
                metadata: serde_json::Map::new(),
            },
            target: "rclone".into(),
            location: "remote:packages/job-1".into(),
        };
        let value = serde_json::to_value(&manifest).expect("serialise");
        assert_eq!(value["jobId"], "job-1");
        assert_eq!(value["target"], "rclone");
        assert_eq!(value["totalSize"], 0);
    }
}
