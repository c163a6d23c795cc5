//! Streamed file digests. MD5 and SHA-256 are computed in the same pass
//! so large payloads are read once.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};

const BUF_SIZE: usize = 64 * 1024;

/// Digests and size for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    /// Lowercase hex MD5.
    pub md5: String,
    /// Lowercase hex SHA-256.
    pub sha256: String,
    /// File size in bytes.
    pub size: u64,
}

/// Compute MD5, SHA-256, and size for a file, reading in bounded chunks.
///
/// # Errors
///
/// Returns the underlying IO error if the file cannot be opened or read.
pub fn digest_file(path: &Path) -> io::Result<FileDigests> {
    let mut file = File::open(path)?;
    let mut md5 = Md5::new();
    let mut sha256 = Sha256::new();
    let mut size = 0u64;
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        md5.update(&buf[..read]);
        sha256.update(&buf[..read]);
        size += read as u64;
    }
    Ok(FileDigests {
        md5: hex::encode(md5.finalize()),
        sha256: hex::encode(sha256.finalize()),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn digests_of_known_content() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"hello\n").expect("write");
        file.flush().expect("flush");
        let digests = digest_file(file.path()).expect("digest");
        assert_eq!(digests.size, 6);
        assert_eq!(digests.md5, "b1946ac92492d2347c6235b4d2611184");
        assert_eq!(
            digests.sha256,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn empty_file_digests() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let digests = digest_file(file.path()).expect("digest");
        assert_eq!(digests.size, 0);
        assert_eq!(digests.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            digests.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
