//! Hash verification with a sidecar cache.
//!
//! Every verified file gets a `<file>.sha256` sibling holding 64 lowercase hex
//! chars. The cache is valid iff its mtime is at least the data file's mtime
//! and its contents equal the computed hash; a touched data file always forces
//! a recompute, so the cache cannot produce a false positive after a content
//! change.

use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::trace;

use crate::core::{Digest, FileHash};
use crate::internal::fsx;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CacheState {
    /// A valid cache entry equals the expected hash.
    Consistent,
    /// No cache entry exists.
    Missing,
    /// The cache entry differs from the expected hash, but recomputing shows
    /// the file itself matches; the entry was stale.
    Mismatch,
    /// The data file is newer than its cache entry.
    FileModified,
    /// Recomputing the hash still disagrees with the expected one: the file
    /// really does not match.
    MismatchAfterRecompute,
}

fn sidecar_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut s = path.to_string();
    s.push_str(".sha256");
    Utf8PathBuf::from(s)
}

/// Computes the SHA-256 of a file, streaming.
pub fn file_hash(path: &Utf8Path) -> Result<FileHash> {
    let file = fsx::open(path)?;
    Ok(Digest::recommended().update_read(file)?.finish())
}

fn read_valid_sidecar(path: &Utf8Path) -> Result<Option<FileHash>> {
    let sidecar = sidecar_path(path);
    if !sidecar.is_file() {
        return Ok(None);
    }
    let file_mtime = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat `{path}`"))?;
    let cache_mtime = fs::metadata(&sidecar)
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat `{sidecar}`"))?;
    if cache_mtime < file_mtime {
        return Ok(None);
    }
    let content = fsx::read_to_string(&sidecar)?;
    Ok(FileHash::parse(content.trim()).ok())
}

fn write_sidecar(path: &Utf8Path, hash: FileHash) -> Result<()> {
    fsx::write(sidecar_path(path), format!("{hash}\n"))
}

/// Classifies the cache without mutating it, recomputing only when the cached
/// answer cannot settle the question.
pub fn cache_state(path: &Utf8Path, expected: FileHash) -> Result<CacheState> {
    let sidecar = sidecar_path(path);
    if !sidecar.is_file() {
        return Ok(CacheState::Missing);
    }
    let file_mtime = fs::metadata(path)
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat `{path}`"))?;
    let cache_mtime = fs::metadata(&sidecar)
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat `{sidecar}`"))?;
    if cache_mtime < file_mtime {
        return Ok(CacheState::FileModified);
    }
    let cached = fsx::read_to_string(&sidecar)?;
    if FileHash::parse(cached.trim()).ok() == Some(expected) {
        return Ok(CacheState::Consistent);
    }
    if file_hash(path)? == expected {
        Ok(CacheState::Mismatch)
    } else {
        Ok(CacheState::MismatchAfterRecompute)
    }
}

/// Returns whether `sha256(path) == expected`, consulting and refreshing the
/// sidecar cache.
pub fn verify(path: &Utf8Path, expected: FileHash) -> Result<bool> {
    if let Some(cached) = read_valid_sidecar(path)? {
        if cached == expected {
            trace!("hash cache hit for `{path}`");
            return Ok(true);
        }
    }
    let computed = file_hash(path)?;
    write_sidecar(path, computed)?;
    Ok(computed == expected)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::{cache_state, file_hash, verify, CacheState};
    use crate::internal::fsx;

    fn temp_file(t: &tempfile::TempDir, content: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(t.path().join("data.tar.gz")).unwrap();
        fsx::write(&path, content).unwrap();
        path
    }

    #[test]
    fn verify_true_iff_hash_matches() {
        let t = tempfile::tempdir().unwrap();
        let path = temp_file(&t, "payload");
        let good = file_hash(&path).unwrap();
        let bad = file_hash(&temp_file(&t, "other")).unwrap();

        let path = temp_file(&t, "payload");
        assert!(verify(&path, good).unwrap());
        assert!(!verify(&path, bad).unwrap());
    }

    #[test]
    fn cache_states_progress() {
        let t = tempfile::tempdir().unwrap();
        let path = temp_file(&t, "payload");
        let expected = file_hash(&path).unwrap();

        assert_eq!(cache_state(&path, expected).unwrap(), CacheState::Missing);

        assert!(verify(&path, expected).unwrap());
        assert_eq!(cache_state(&path, expected).unwrap(), CacheState::Consistent);

        // A different expectation, while the file still matches its sidecar:
        // stale-mismatch resolves in the file's favor.
        let other = file_hash(&temp_file(&t, "other")).unwrap();
        let path = temp_file(&t, "payload");
        assert!(verify(&path, expected).unwrap());
        assert_eq!(cache_state(&path, other).unwrap(), CacheState::MismatchAfterRecompute);
    }

    #[test]
    fn cache_never_false_positive_after_content_change() {
        let t = tempfile::tempdir().unwrap();
        let path = temp_file(&t, "payload");
        let original = file_hash(&path).unwrap();
        assert!(verify(&path, original).unwrap());

        // Rewrite the file; ensure its mtime moves past the sidecar's.
        std::thread::sleep(std::time::Duration::from_millis(20));
        fsx::write(&path, "tampered").unwrap();

        let state = cache_state(&path, original).unwrap();
        assert!(
            matches!(state, CacheState::FileModified | CacheState::MismatchAfterRecompute),
            "unexpected state {state:?}"
        );
        assert!(!verify(&path, original).unwrap());
    }
}
