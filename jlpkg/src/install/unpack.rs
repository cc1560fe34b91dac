//! Tar extraction and git-style tree hashing.
//!
//! Extraction always lands in a temporary sibling of the destination and is
//! renamed into place on success, so cancellation never leaves a half-written
//! installation directory behind.

use std::collections::BTreeMap;
use std::io::Read;

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::core::checksum::TreeDigest;
use crate::core::TreeHash;
use crate::internal::fsx;

/// How symlink entries inside archives are handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SymlinkMode {
    /// Create real symlinks.
    Native,
    /// Extract without symlinks, then copy-dereference each link's target
    /// into place. Used on filesystems without symlink support.
    Copy,
}

/// Detects symlink support by attempting to create one in `dir`.
pub fn probe_symlinks(dir: &Utf8Path) -> SymlinkMode {
    #[cfg(unix)]
    {
        let probe = dir.join(".jlpkg-symlink-probe");
        let _ = fsx::remove_file(&probe);
        match std::os::unix::fs::symlink("probe-target", &probe) {
            Ok(()) => {
                let _ = fsx::remove_file(&probe);
                SymlinkMode::Native
            }
            Err(_) => SymlinkMode::Copy,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        SymlinkMode::Copy
    }
}

/// Unpacks a package tarball into `dest`, verifying and recording its tree
/// hash.
///
/// Verification happens on the staged tree, before anything becomes visible
/// at `dest`. The tree hash can only be recomputed faithfully when real
/// symlinks were extracted, so verification is skipped in
/// [`SymlinkMode::Copy`]. A `.tree_info.toml` the tarball carried of its own
/// is overwritten, with a warning.
pub fn unpack_package(
    tarball: &Utf8Path,
    dest: &Utf8Path,
    mode: SymlinkMode,
    tree: TreeHash,
) -> Result<()> {
    stage_and_rename(tarball, dest, mode, |staging| {
        if mode == SymlinkMode::Native {
            let computed = hash_tree(staging)?;
            if computed != tree {
                return Err(crate::core::HashError::Mismatch {
                    path: tarball.to_string(),
                    expected: tree.to_string(),
                    computed: computed.to_string(),
                }
                .into());
            }
        }
        if staging.join(crate::TREE_INFO_FILE_NAME).exists() {
            warn!("tarball for tree {tree} carries its own tree info file; overwriting");
        }
        crate::depot::write_tree_info(staging, tree)
    })
}

/// Unpacks a (possibly gzipped) tarball into `dest`.
///
/// A leading `./` on entry paths is stripped. Extraction happens in a
/// temporary sibling directory renamed over `dest` at the end; if `dest`
/// appeared concurrently, the freshly extracted copy is discarded in its
/// favor.
pub fn unpack_tarball(tarball: &Utf8Path, dest: &Utf8Path, mode: SymlinkMode) -> Result<()> {
    stage_and_rename(tarball, dest, mode, |_| Ok(()))
}

fn stage_and_rename(
    tarball: &Utf8Path,
    dest: &Utf8Path,
    mode: SymlinkMode,
    finalize: impl FnOnce(&Utf8Path) -> Result<()>,
) -> Result<()> {
    let parent = dest
        .parent()
        .with_context(|| format!("destination `{dest}` has no parent"))?;
    fsx::create_dir_all(parent)?;
    let staging = tempfile::Builder::new()
        .prefix(".jlpkg-unpack-")
        .tempdir_in(parent)
        .with_context(|| format!("failed to create staging directory in `{parent}`"))?;
    let staging_root = Utf8Path::from_path(staging.path())
        .with_context(|| "staging path is not UTF-8")?
        .to_path_buf();

    extract_into(tarball, &staging_root, mode)?;
    finalize(&staging_root)?;

    match std::fs::rename(&staging_root, dest) {
        Ok(()) => {
            // The tempdir guard would otherwise complain about the moved dir.
            std::mem::forget(staging);
            Ok(())
        }
        Err(_) if dest.is_dir() => {
            debug!("`{dest}` was installed concurrently; discarding staged copy");
            Ok(())
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to move unpacked tree into `{dest}`"))
        }
    }
}

fn open_tar(tarball: &Utf8Path) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = fsx::open(tarball)?;
    let reader: Box<dyn Read> = if tarball.as_str().ends_with(".gz")
        || tarball.as_str().ends_with(".tgz")
    {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    Ok(tar::Archive::new(reader))
}

fn normalize_entry_path(path: &std::path::Path) -> Utf8PathBuf {
    let s = path.to_string_lossy();
    let s = s.strip_prefix("./").unwrap_or(&s);
    Utf8PathBuf::from(s)
}

fn extract_into(tarball: &Utf8Path, dest: &Utf8Path, mode: SymlinkMode) -> Result<()> {
    let mut archive = open_tar(tarball)?;
    archive.set_preserve_permissions(true);

    // Deferred symlinks in Copy mode: link path → target path.
    let mut links: Vec<(Utf8PathBuf, Utf8PathBuf)> = Vec::new();

    for entry in archive
        .entries()
        .with_context(|| format!("failed to read archive `{tarball}`"))?
    {
        let mut entry = entry?;
        let rel = normalize_entry_path(&entry.path()?);
        if rel.as_str().is_empty() {
            continue;
        }
        let target = dest.join(&rel);

        let kind = entry.header().entry_type();
        if kind.is_symlink() && mode == SymlinkMode::Copy {
            if let Some(link) = entry.link_name()? {
                links.push((rel, normalize_entry_path(&link)));
            }
            continue;
        }

        if let Some(parent) = target.parent() {
            fsx::create_dir_all(parent)?;
        }
        entry
            .unpack(&target)
            .with_context(|| format!("failed to extract `{rel}` from `{tarball}`"))?;
    }

    // Copy-dereference deferred symlinks: the would-be link becomes a regular
    // copy of its target.
    for (link, link_target) in links {
        let resolved = match link.parent() {
            Some(parent) => dest.join(parent).join(&link_target),
            None => dest.join(&link_target),
        };
        let destination = dest.join(&link);
        if resolved.is_file() {
            if let Some(parent) = destination.parent() {
                fsx::create_dir_all(parent)?;
            }
            fsx::copy(&resolved, &destination)?;
        } else if resolved.is_dir() {
            copy_dir(&resolved, &destination)?;
        } else {
            warn!("symlink source `{resolved}` is missing; skipping `{link}`");
        }
    }

    Ok(())
}

fn copy_dir(from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    fsx::create_dir_all(to)?;
    for entry in from.read_dir_utf8()? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copy_dir(source, &target)?;
        } else {
            fsx::copy(source, &target)?;
        }
    }
    Ok(())
}

/// Computes the git tree hash of a directory: the content address that
/// identifies an installed source tree.
pub fn hash_tree(dir: &Utf8Path) -> Result<TreeHash> {
    enum TreeEntry {
        Blob { mode: &'static str, hash: TreeHash },
        Tree { hash: TreeHash },
    }

    fn blob_hash(content: &[u8]) -> TreeHash {
        let mut digest = TreeDigest::new();
        digest.update(format!("blob {}\0", content.len()).as_bytes());
        digest.update(content);
        digest.finish()
    }

    fn hash_dir(dir: &Utf8Path) -> Result<TreeHash> {
        // Git orders tree entries by name, with directory names comparing as
        // if they had a trailing slash.
        let mut entries: BTreeMap<String, (String, TreeEntry)> = BTreeMap::new();
        for entry in dir
            .read_dir_utf8()
            .with_context(|| format!("failed to list `{dir}`"))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string();
            let path = entry.path();
            let metadata = std::fs::symlink_metadata(path)
                .with_context(|| format!("failed to stat `{path}`"))?;

            let (sort_key, value) = if metadata.file_type().is_symlink() {
                let target = std::fs::read_link(path)
                    .with_context(|| format!("failed to read link `{path}`"))?;
                let hash = blob_hash(target.to_string_lossy().as_bytes());
                (
                    name.clone(),
                    TreeEntry::Blob {
                        mode: "120000",
                        hash,
                    },
                )
            } else if metadata.is_dir() {
                let hash = hash_dir(path)?;
                (format!("{name}/"), TreeEntry::Tree { hash })
            } else {
                let content = fsx::read(path)?;
                let mode = if is_executable(&metadata) {
                    "100755"
                } else {
                    "100644"
                };
                (name.clone(), TreeEntry::Blob {
                    mode,
                    hash: blob_hash(&content),
                })
            };
            entries.insert(sort_key, (name, value));
        }

        let mut body: Vec<u8> = Vec::new();
        for (_, (name, entry)) in &entries {
            let (mode, hash) = match entry {
                TreeEntry::Blob { mode, hash } => (*mode, hash),
                TreeEntry::Tree { hash } => ("40000", hash),
            };
            body.extend_from_slice(format!("{mode} {name}\0").as_bytes());
            body.extend_from_slice(hash.as_bytes());
        }

        let mut digest = TreeDigest::new();
        digest.update(format!("tree {}\0", body.len()).as_bytes());
        digest.update(&body);
        Ok(digest.finish())
    }

    #[cfg(unix)]
    fn is_executable(metadata: &std::fs::Metadata) -> bool {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    fn is_executable(_metadata: &std::fs::Metadata) -> bool {
        false
    }

    if !dir.is_dir() {
        bail!("`{dir}` is not a directory");
    }
    hash_dir(dir)
}
