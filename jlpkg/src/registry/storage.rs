//! Backing storage for a registry: a plain directory tree, or a tar archive
//! kept decompressed in memory.

use std::collections::HashMap;
use std::io::Read;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;

use crate::core::TreeHash;
use crate::internal::fsx;

#[derive(Debug)]
pub enum RegistryStorage {
    /// Files are read from disk on demand.
    Dir { root: Utf8PathBuf },
    /// The gunzipped tar payload held as an in-memory `path → bytes` map.
    Tarball {
        tree_hash: TreeHash,
        files: HashMap<String, Vec<u8>>,
    },
}

impl RegistryStorage {
    pub fn open_dir(root: impl Into<Utf8PathBuf>) -> Self {
        Self::Dir { root: root.into() }
    }

    pub fn open_tarball(path: &Utf8Path, tree_hash: TreeHash) -> Result<Self> {
        let raw = fsx::read(path)?;
        let files = read_tar_entries(path, raw)?;
        Ok(Self::Tarball { tree_hash, files })
    }

    /// Reads a registry-relative file, or `None` when it does not exist.
    pub fn read(&self, rel: &str) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Dir { root } => {
                let path = root.join(rel);
                if path.is_file() {
                    fsx::read(&path).map(Some)
                } else {
                    Ok(None)
                }
            }
            Self::Tarball { files, .. } => Ok(files.get(rel).cloned()),
        }
    }

    pub fn read_to_string(&self, rel: &str) -> Result<Option<String>> {
        match self.read(rel)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .with_context(|| format!("registry file `{rel}` is not UTF-8")),
        }
    }

    /// The content tree hash, when the backing medium carries one.
    ///
    /// Registry caches are rebuilt when this changes.
    pub fn tree_hash(&self) -> Option<TreeHash> {
        match self {
            Self::Dir { .. } => None,
            Self::Tarball { tree_hash, .. } => Some(*tree_hash),
        }
    }
}

fn read_tar_entries(path: &Utf8Path, raw: Vec<u8>) -> Result<HashMap<String, Vec<u8>>> {
    let payload: Box<dyn Read> = if path.as_str().ends_with(".gz") || path.as_str().ends_with(".tgz")
    {
        Box::new(GzDecoder::new(std::io::Cursor::new(raw)))
    } else {
        Box::new(std::io::Cursor::new(raw))
    };

    let mut archive = tar::Archive::new(payload);
    let mut files = HashMap::new();
    for entry in archive
        .entries()
        .with_context(|| format!("failed to read registry archive `{path}`"))?
    {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let rel = entry.path()?.to_string_lossy().into_owned();
        let rel = rel.strip_prefix("./").unwrap_or(&rel).to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        files.insert(rel, bytes);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::RegistryStorage;
    use crate::core::TreeHash;
    use crate::internal::fsx;

    fn write_tarball(dir: &Utf8PathBuf, entries: &[(&str, &str)]) -> Utf8PathBuf {
        let path = dir.join("Test.tar");
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .unwrap();
        }
        fsx::write(&path, builder.into_inner().unwrap()).unwrap();
        path
    }

    #[test]
    fn dir_storage_reads_from_disk() {
        let t = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(t.path().to_path_buf()).unwrap();
        fsx::write(root.join("Registry.toml"), "name = \"Test\"").unwrap();

        let storage = RegistryStorage::open_dir(root);
        assert_eq!(
            storage.read_to_string("Registry.toml").unwrap().unwrap(),
            "name = \"Test\""
        );
        assert!(storage.read("Missing.toml").unwrap().is_none());
        assert!(storage.tree_hash().is_none());
    }

    #[test]
    fn tarball_storage_keeps_files_in_memory() {
        let t = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(t.path().to_path_buf()).unwrap();
        let tarball = write_tarball(&root, &[("Registry.toml", "name = \"Test\"")]);
        let hash = TreeHash::parse("0000000000000000000000000000000000000abc").unwrap();

        let storage = RegistryStorage::open_tarball(&tarball, hash).unwrap();
        assert_eq!(
            storage.read_to_string("Registry.toml").unwrap().unwrap(),
            "name = \"Test\""
        );
        assert_eq!(storage.tree_hash(), Some(hash));
    }
}
