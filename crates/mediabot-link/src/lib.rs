#![forbid(unsafe_code)]

//! Pure link classification for the downloader router.
//!
//! Classification is a total function over the trimmed input: first match
//! in a fixed rule order wins, comparisons are case-insensitive, and
//! extraction keeps the original character case except for info-hashes,
//! which are always lowercased. An input matching no rule classifies to
//! `None`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static BTIH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)btih:([0-9a-f]{40}|[a-z2-7]{32})").expect("valid btih pattern")
});
static GDRIVE_FILE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"/file/d/([A-Za-z0-9_-]+)",
        r"[?&]id=([A-Za-z0-9_-]+)",
        r"/d/([A-Za-z0-9_-]+)",
        r"(?i)gdrive://([A-Za-z0-9_-]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid gdrive pattern"))
    .collect()
});
static GDRIVE_FOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/folders/([A-Za-z0-9_-]+)").expect("valid folder pattern"));
static NZB_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([^/\\?#]+\.nzb)(?:[?#]|$)").expect("valid nzb pattern"));

/// Link families the router knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// BitTorrent magnet URI.
    Magnet,
    /// Direct link to a `.torrent` file.
    Torrent,
    /// Usenet NZB reference.
    Nzb,
    /// Google Drive file or folder.
    Gdrive,
    /// FTP URL; recognised but not routable.
    Ftp,
    /// HTTPS URL.
    Https,
    /// Plain HTTP URL.
    Http,
}

impl LinkKind {
    /// Stable label used in persistence and progress records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Magnet => "magnet",
            Self::Torrent => "torrent",
            Self::Nzb => "nzb",
            Self::Gdrive => "gdrive",
            Self::Ftp => "ftp",
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

/// Metadata extracted from a magnet URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MagnetMetadata {
    /// Lowercased info-hash (40 hex or 32 base32 characters).
    pub info_hash: Option<String>,
    /// URL-decoded display name from the `dn` parameter.
    pub display_name: Option<String>,
    /// URL-decoded tracker list from the `tr` parameters, in order.
    pub trackers: Vec<String>,
}

/// Metadata extracted from a Google Drive link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdriveMetadata {
    /// File id, when the link addresses a single file.
    pub file_id: Option<String>,
    /// Folder id, when the link addresses a folder.
    pub folder_id: Option<String>,
}

/// A classified link with whatever metadata its family carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedLink {
    /// The trimmed input the classification was made from.
    pub original: String,
    /// Matched family.
    pub kind: LinkKind,
    /// Magnet metadata, for `Magnet` links.
    pub magnet: Option<MagnetMetadata>,
    /// Drive metadata, for `Gdrive` links.
    pub gdrive: Option<GdriveMetadata>,
    /// Trailing `*.nzb` filename, for `Nzb` links.
    pub nzb_name: Option<String>,
}

impl ClassifiedLink {
    fn plain(original: &str, kind: LinkKind) -> Self {
        Self {
            original: original.to_string(),
            kind,
            magnet: None,
            gdrive: None,
            nzb_name: None,
        }
    }
}

/// Classify a link string, or return `None` for unrecognised input.
///
/// Rule order, first match wins: magnet prefix, `.torrent` suffix, nzb
/// suffix/scheme, Google Drive host or `gdrive:` scheme, then the plain
/// `ftp`/`https`/`http` schemes. Ordering matters: an HTTPS URL on
/// `drive.google.com` classifies as gdrive, not https.
#[must_use]
pub fn classify(input: &str) -> Option<ClassifiedLink> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_ascii_lowercase();

    if lowered.starts_with("magnet:") {
        return Some(classify_magnet(trimmed));
    }
    if lowered.ends_with(".torrent") {
        return Some(ClassifiedLink::plain(trimmed, LinkKind::Torrent));
    }
    if lowered.ends_with(".nzb") || lowered.starts_with("nzb://") {
        let mut link = ClassifiedLink::plain(trimmed, LinkKind::Nzb);
        link.nzb_name = NZB_NAME
            .captures(trimmed)
            .and_then(|captures| captures.get(1))
            .map(|name| name.as_str().to_string());
        return Some(link);
    }
    if lowered.contains("drive.google.com")
        || lowered.starts_with("gdrive:")
        || lowered.starts_with("gdrive://")
    {
        return Some(classify_gdrive(trimmed));
    }
    if lowered.starts_with("ftp://") {
        return Some(ClassifiedLink::plain(trimmed, LinkKind::Ftp));
    }
    if lowered.starts_with("https://") {
        return Some(ClassifiedLink::plain(trimmed, LinkKind::Https));
    }
    if lowered.starts_with("http://") {
        return Some(ClassifiedLink::plain(trimmed, LinkKind::Http));
    }
    None
}

fn classify_magnet(trimmed: &str) -> ClassifiedLink {
    let mut metadata = MagnetMetadata {
        info_hash: BTIH
            .captures(trimmed)
            .and_then(|captures| captures.get(1))
            .map(|hash| hash.as_str().to_ascii_lowercase()),
        display_name: None,
        trackers: Vec::new(),
    };

    if let Some(query) = trimmed.split_once('?').map(|(_, query)| query) {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "dn" if metadata.display_name.is_none() => {
                    metadata.display_name = Some(value.into_owned());
                }
                "tr" => metadata.trackers.push(value.into_owned()),
                _ => {}
            }
        }
    }

    let mut link = ClassifiedLink::plain(trimmed, LinkKind::Magnet);
    link.magnet = Some(metadata);
    link
}

fn classify_gdrive(trimmed: &str) -> ClassifiedLink {
    let folder_id = GDRIVE_FOLDER
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string());
    let file_id = if folder_id.is_some() {
        None
    } else {
        GDRIVE_FILE_PATTERNS
            .iter()
            .find_map(|pattern| pattern.captures(trimmed))
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
    };

    let mut link = ClassifiedLink::plain(trimmed, LinkKind::Gdrive);
    link.gdrive = Some(GdriveMetadata { file_id, folder_id });
    link
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnet_with_hex_hash_and_name() {
        let link = classify(
            "magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD&dn=Foo&tr=udp%3A%2F%2Ftracker.test%3A1337",
        )
        .expect("magnet");
        assert_eq!(link.kind, LinkKind::Magnet);
        let magnet = link.magnet.expect("metadata");
        assert_eq!(
            magnet.info_hash.as_deref(),
            Some("aabbccddeeff00112233445566778899aabbccdd")
        );
        assert_eq!(magnet.display_name.as_deref(), Some("Foo"));
        assert_eq!(magnet.trackers, vec!["udp://tracker.test:1337".to_string()]);
    }

    #[test]
    fn magnet_with_base32_hash_is_lowercased() {
        let link = classify("MAGNET:?xt=urn:btih:MFRGGZDFMZTWQ2LKNNWG23TPOBYXE43U").expect("magnet");
        let magnet = link.magnet.expect("metadata");
        assert_eq!(
            magnet.info_hash.as_deref(),
            Some("mfrggzdfmztwq2lknnwg23tpobyxe43u")
        );
    }

    #[test]
    fn torrent_suffix_wins_over_https() {
        let link = classify("https://mirror.test/linux.torrent").expect("torrent");
        assert_eq!(link.kind, LinkKind::Torrent);
    }

    #[test]
    fn nzb_extracts_trailing_filename() {
        let link = classify("https://indexer.test/get/release.of.interest.nzb").expect("nzb");
        assert_eq!(link.kind, LinkKind::Nzb);
        assert_eq!(link.nzb_name.as_deref(), Some("release.of.interest.nzb"));

        let scheme = classify("nzb://release.nzb").expect("nzb scheme");
        assert_eq!(scheme.kind, LinkKind::Nzb);
        assert_eq!(scheme.nzb_name.as_deref(), Some("release.nzb"));
    }

    #[test]
    fn gdrive_host_wins_over_https() {
        let link =
            classify("https://drive.google.com/file/d/1AbC_d-EfG/view?usp=sharing").expect("gdrive");
        assert_eq!(link.kind, LinkKind::Gdrive);
        let gdrive = link.gdrive.expect("metadata");
        assert_eq!(gdrive.file_id.as_deref(), Some("1AbC_d-EfG"));
        assert_eq!(gdrive.folder_id, None);
    }

    #[test]
    fn gdrive_folder_and_scheme_forms() {
        let folder =
            classify("https://drive.google.com/drive/folders/0Folder_Id-9").expect("gdrive");
        assert_eq!(
            folder.gdrive.expect("metadata").folder_id.as_deref(),
            Some("0Folder_Id-9")
        );

        let scheme = classify("gdrive://1SomeFileId").expect("gdrive scheme");
        assert_eq!(
            scheme.gdrive.expect("metadata").file_id.as_deref(),
            Some("1SomeFileId")
        );
    }

    #[test]
    fn gdrive_id_query_parameter() {
        let link = classify("https://drive.google.com/open?id=1QueryId_x").expect("gdrive");
        assert_eq!(
            link.gdrive.expect("metadata").file_id.as_deref(),
            Some("1QueryId_x")
        );
    }

    #[test]
    fn plain_schemes_classify_in_order() {
        assert_eq!(classify("ftp://host/file").expect("ftp").kind, LinkKind::Ftp);
        assert_eq!(
            classify("https://host/file.mkv").expect("https").kind,
            LinkKind::Https
        );
        assert_eq!(
            classify("HTTP://host/file.mkv").expect("http").kind,
            LinkKind::Http
        );
    }

    #[test]
    fn unknown_input_is_none() {
        assert!(classify("not a link").is_none());
        assert!(classify("   ").is_none());
    }

    #[test]
    fn classification_is_idempotent() {
        let inputs = [
            "magnet:?xt=urn:btih:AABBCCDDEEFF00112233445566778899AABBCCDD&dn=Foo",
            "https://drive.google.com/file/d/1AbC/view",
            "  https://mirror.test/a.torrent  ",
            "nzb://release.nzb",
        ];
        for input in inputs {
            let first = classify(input).expect("classifies");
            let second = classify(&first.original).expect("re-classifies");
            assert_eq!(first, second);
        }
    }
}
