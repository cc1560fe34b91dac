//! The depot: the directory hosting installations, caches, registries and
//! logs, shared across projects.

use std::env;

use anyhow::{anyhow, bail, Result};
use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use toml::value::{Table, Value};

use crate::core::{Digest, PackageName, TreeHash};
use crate::flock::{AdvisoryLock, Filesystem};
use crate::internal::fsx;
use crate::internal::fsx::PathUtf8Ext;
use crate::registry::{RegistryIndex, RegistrySet};
use crate::{DEPOT_PATH_ENV, TREE_INFO_FILE_NAME};

pub use usage::UsageLog;

pub mod gc;
pub mod usage;

/// A depot rooted at a directory, with the fixed layout:
/// `packages/`, `artifacts/`, `clones/`, `scratchspaces/`, `logs/`,
/// `registries/`, `environments/`.
#[derive(Debug)]
pub struct Depot {
    fs: Filesystem,
}

impl Depot {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            fs: Filesystem::new(root),
        }
    }

    /// The depot for this process: the `JLPKG_DEPOT_PATH` override, or the
    /// platform cache directory.
    pub fn discover() -> Result<Self> {
        if let Some(path) = env::var_os(DEPOT_PATH_ENV) {
            let path = Utf8PathBuf::from_path_buf(path.into())
                .map_err(|p| anyhow!("depot path `{}` is not UTF-8 encoded", p.display()))?;
            return Ok(Self::new(path));
        }
        let dirs = ProjectDirs::from("org", "jlpkg", "jlpkg").ok_or_else(|| {
            anyhow!("no valid home directory path could be retrieved from the operating system")
        })?;
        Ok(Self::new(dirs.cache_dir().try_to_utf8()?))
    }

    pub fn root(&self) -> &Utf8Path {
        self.fs.path_unchecked()
    }

    pub fn packages_dir(&self) -> Filesystem {
        self.fs.child("packages")
    }

    pub fn artifacts_dir(&self) -> Filesystem {
        self.fs.child("artifacts")
    }

    pub fn clones_dir(&self) -> Filesystem {
        self.fs.child("clones")
    }

    pub fn scratchspaces_dir(&self) -> Filesystem {
        self.fs.child("scratchspaces")
    }

    pub fn logs_dir(&self) -> Filesystem {
        self.fs.child("logs")
    }

    pub fn registries_dir(&self) -> Filesystem {
        self.fs.child("registries")
    }

    pub fn environments_dir(&self) -> Filesystem {
        self.fs.child("environments")
    }

    /// The lock serializing collectors; ordinary operations in other
    /// environments keep running concurrently and are tolerated by GC.
    pub fn gc_lock(&self) -> AdvisoryLock<'_> {
        self.fs.advisory_lock("logs/gc.lock", "depot garbage collection")
    }

    /// Opens every registry found under `registries/`, in directory order.
    pub fn registries(&self) -> Result<RegistrySet> {
        let dir = self.registries_dir();
        let root = dir.path_unchecked();
        if !root.is_dir() {
            return Ok(RegistrySet::default());
        }
        let mut entries: Vec<Utf8PathBuf> = Vec::new();
        for entry in root.read_dir_utf8()? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                entries.push(path.to_path_buf());
            } else if path.extension() == Some("toml") {
                entries.push(path.to_path_buf());
            }
        }
        entries.sort();
        let mut registries = Vec::with_capacity(entries.len());
        for path in entries {
            registries.push(RegistryIndex::open(&path)?);
        }
        Ok(RegistrySet::new(registries))
    }

    /// The installation directory for a package tree:
    /// `packages/<name>/<slug>`, where the slug is the shortest unambiguous
    /// hex prefix of the tree hash, 8 characters or longer.
    ///
    /// A slug that is already taken by a *different* tree extends until the
    /// collision disappears.
    pub fn package_path(&self, name: &PackageName, tree: TreeHash) -> Result<Utf8PathBuf> {
        let base = self.packages_dir().path_unchecked().join(name.as_str());
        for len in 8..=40 {
            let candidate = base.join(tree.slug(len));
            match read_tree_info(&candidate)? {
                None => return Ok(candidate),
                Some(recorded) if recorded == tree => return Ok(candidate),
                Some(_) => continue,
            }
        }
        bail!("cannot find a free slug for {name} tree {tree}");
    }

    /// Where a package tree is materialized, when it is.
    pub fn find_package(&self, name: &PackageName, tree: TreeHash) -> Option<Utf8PathBuf> {
        let path = self.package_path(name, tree).ok()?;
        path.is_dir().then_some(path)
    }

    /// Whether any installed package directory carries this tree hash.
    ///
    /// Consulted by the `*_INSTALLED` preservation policies.
    pub fn is_materialized(&self, name: &PackageName, tree: TreeHash) -> bool {
        self.find_package(name, tree).is_some()
    }

    /// The shared installation directory of an artifact tree.
    pub fn artifact_path(&self, tree: TreeHash) -> Utf8PathBuf {
        self.artifacts_dir()
            .path_unchecked()
            .join(tree.to_string())
    }

    /// The clone directory for a repository URL: `clones/<hash-of-url>`.
    pub fn clone_path(&self, url: &str) -> Utf8PathBuf {
        let hash = Digest::recommended().update(url.as_bytes()).finish();
        let slug = &hash.to_string()[..16];
        self.clones_dir().path_unchecked().join(slug)
    }
}

/// Reads the `.tree_info.toml` sidecar inside an installed tree, identifying
/// which tree hash the directory holds.
pub fn read_tree_info(dir: &Utf8Path) -> Result<Option<TreeHash>> {
    let path = dir.join(TREE_INFO_FILE_NAME);
    if !path.is_file() {
        return Ok(None);
    }
    let content = fsx::read_to_string(&path)?;
    let table: Table = toml::from_str(&content)
        .map_err(|e| anyhow!("invalid tree info at `{path}`: {e}"))?;
    let hash = table
        .get("git-tree-sha1")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("tree info at `{path}` is missing `git-tree-sha1`"))?;
    Ok(Some(TreeHash::parse(hash)?))
}

/// Writes the `.tree_info.toml` sidecar into an installed tree.
pub fn write_tree_info(dir: &Utf8Path, tree: TreeHash) -> Result<()> {
    let path = dir.join(TREE_INFO_FILE_NAME);
    fsx::write(&path, format!("git-tree-sha1 = \"{tree}\"\n"))
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::{write_tree_info, Depot};
    use crate::core::{PackageName, TreeHash};
    use crate::internal::fsx;

    fn depot(t: &tempfile::TempDir) -> Depot {
        Depot::new(Utf8PathBuf::from_path_buf(t.path().to_path_buf()).unwrap())
    }

    fn tree(suffix: &str) -> TreeHash {
        TreeHash::parse(&format!("{}{suffix}", &"0".repeat(40 - suffix.len()))).unwrap()
    }

    #[test]
    fn slug_is_eight_hex_chars() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let hash = TreeHash::parse("d30e1a5d8d53d3a6dc20a8e2a573068cd6a1ef29").unwrap();
        let path = depot
            .package_path(&PackageName::new("Example"), hash)
            .unwrap();
        assert_eq!(path.file_name(), Some("d30e1a5d"));
        assert!(path.as_str().contains("packages/Example"));
    }

    #[test]
    fn slug_extends_on_collision() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let name = PackageName::new("Example");

        // Two trees sharing the first 8 hex chars.
        let a = TreeHash::parse("aaaaaaaa00000000000000000000000000000001").unwrap();
        let b = TreeHash::parse("aaaaaaaa00000000000000000000000000000002").unwrap();

        let path_a = depot.package_path(&name, a).unwrap();
        fsx::create_dir_all(&path_a).unwrap();
        write_tree_info(&path_a, a).unwrap();

        let path_b = depot.package_path(&name, b).unwrap();
        assert_ne!(path_a, path_b);
        assert_eq!(path_b.file_name(), Some("aaaaaaaa0"));

        // The original tree keeps resolving to its own directory.
        assert_eq!(depot.package_path(&name, a).unwrap(), path_a);
    }

    #[test]
    fn materialization_check() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let name = PackageName::new("Example");
        let hash = tree("51");

        assert!(!depot.is_materialized(&name, hash));
        let path = depot.package_path(&name, hash).unwrap();
        fsx::create_dir_all(&path).unwrap();
        write_tree_info(&path, hash).unwrap();
        assert!(depot.is_materialized(&name, hash));
    }

    #[test]
    fn clone_path_is_stable_per_url() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let a = depot.clone_path("https://example.com/Foo.jl.git");
        let b = depot.clone_path("https://example.com/Foo.jl.git");
        let c = depot.clone_path("https://example.com/Bar.jl.git");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
