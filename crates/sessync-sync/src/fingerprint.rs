//! Change detection.
//!
//! A file is reparsed when its size differs from, or its mtime is newer than,
//! the fingerprint recorded by the last successful write. Identical size and
//! mtime are taken to mean identical content without reading the file. This
//! keeps a pass over a large, mostly idle tree down to one `stat` per file,
//! at the price of missing an in-place rewrite that preserves both values.
//! The SHA-256 stored with each session records what was parsed; it is not
//! consulted here.

use std::fs::Metadata;
use std::time::UNIX_EPOCH;

use sessync_core::models::FileFingerprint;
use sha2::{Digest, Sha256};

/// Whether a file must be parsed again.
pub fn needs_reparse(current: FileFingerprint, last_known: Option<FileFingerprint>) -> bool {
    match last_known {
        None => true,
        Some(last) => current.size != last.size || current.mtime > last.mtime,
    }
}

/// Fingerprint from file metadata, with mtime in nanoseconds since the epoch.
pub fn fingerprint_of(meta: &Metadata) -> FileFingerprint {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX));
    FileFingerprint {
        size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
        mtime,
    }
}

/// Hex SHA-256 of a file's bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(size: i64, mtime: i64) -> FileFingerprint {
        FileFingerprint { size, mtime }
    }

    #[test]
    fn first_seen_is_always_parsed() {
        assert!(needs_reparse(fp(10, 5), None));
    }

    #[test]
    fn identical_fingerprint_is_skipped() {
        assert!(!needs_reparse(fp(10, 5), Some(fp(10, 5))));
    }

    #[test]
    fn size_change_in_either_direction_is_parsed() {
        assert!(needs_reparse(fp(12, 5), Some(fp(10, 5))));
        assert!(needs_reparse(fp(8, 5), Some(fp(10, 5))));
    }

    #[test]
    fn newer_mtime_is_parsed_older_is_not() {
        assert!(needs_reparse(fp(10, 6), Some(fp(10, 5))));
        assert!(!needs_reparse(fp(10, 4), Some(fp(10, 5))));
    }

    #[test]
    fn hash_is_lowercase_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn metadata_fingerprint_matches_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("f.jsonl");
        std::fs::write(&path, b"12345").expect("write");
        let meta = std::fs::metadata(&path).expect("meta");
        let fp = fingerprint_of(&meta);
        assert_eq!(fp.size, 5);
        assert!(fp.mtime > 0);
    }
}
