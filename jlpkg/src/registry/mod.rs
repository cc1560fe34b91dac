//! The on-disk catalog mapping `(uuid, version)` to tree hashes, dependency
//! edges and compat constraints.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use camino::Utf8Path;
use semver::Version;
use toml::value::{Table, Value};
use tracing::debug;

pub use data::{PackageData, VersionInfo};
pub use storage::RegistryStorage;

use crate::core::{PackageName, RegistryError, TreeHash, Uuid, VersionSpec};
use crate::internal::once_map::OnceMap;

pub mod compress;
pub mod data;
pub mod storage;

pub const REGISTRY_TOML: &str = "Registry.toml";

#[derive(Debug)]
struct PackageRef {
    name: PackageName,
    path: String,
}

/// An immutable view of one registry, keyed by package UUID.
///
/// `Registry.toml` is parsed eagerly on open; per-package files are parsed
/// lazily and memoized behind a single-flight map, so concurrent readers of
/// the same package block on one load.
#[derive(Debug)]
pub struct RegistryIndex {
    pub name: String,
    pub uuid: Option<Uuid>,
    pub repo: Option<String>,
    storage: RegistryStorage,
    packages: HashMap<Uuid, PackageRef>,
    cache: OnceMap<Uuid, Arc<PackageData>>,
}

impl RegistryIndex {
    /// Opens a registry rooted at `path`.
    ///
    /// A directory is read in place. A `.toml` file is treated as the sidecar
    /// of a tar archive, carrying the archive's path and tree hash.
    pub fn open(path: &Utf8Path) -> Result<Self> {
        if path.is_dir() {
            Self::from_storage(RegistryStorage::open_dir(path))
        } else if path.extension() == Some("toml") {
            Self::open_sidecar(path)
        } else {
            bail!("registry path `{path}` is neither a directory nor a sidecar file");
        }
    }

    fn open_sidecar(path: &Utf8Path) -> Result<Self> {
        let content = crate::internal::fsx::read_to_string(path)?;
        let sidecar: Table = toml::from_str(&content)
            .with_context(|| format!("failed to parse registry sidecar `{path}`"))?;
        let tarball = sidecar
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("registry sidecar `{path}` is missing `path`"))?;
        let tree_hash = sidecar
            .get("git-tree-sha1")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("registry sidecar `{path}` is missing `git-tree-sha1`"))?;
        let tree_hash = TreeHash::parse(tree_hash)?;
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("registry sidecar `{path}` has no parent directory"))?;
        let storage = RegistryStorage::open_tarball(&parent.join(tarball), tree_hash)?;
        Self::from_storage(storage)
    }

    fn from_storage(storage: RegistryStorage) -> Result<Self> {
        let content = storage
            .read_to_string(REGISTRY_TOML)?
            .ok_or_else(|| anyhow!("registry has no {REGISTRY_TOML}"))?;
        let root: Table =
            toml::from_str(&content).with_context(|| format!("failed to parse {REGISTRY_TOML}"))?;

        let name = root
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("registry")
            .to_string();
        let uuid = root
            .get("uuid")
            .and_then(Value::as_str)
            .map(Uuid::parse)
            .transpose()?;
        let repo = root
            .get("repo")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut packages = HashMap::new();
        if let Some(Value::Table(table)) = root.get("packages") {
            for (key, entry) in table {
                let uuid = Uuid::parse(key)?;
                let Value::Table(entry) = entry else {
                    bail!("package entry `{key}` in {REGISTRY_TOML} must be a table");
                };
                let pkg_name = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("package entry `{key}` is missing `name`"))?;
                let path = entry
                    .get("path")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("package entry `{key}` is missing `path`"))?;
                packages.insert(
                    uuid,
                    PackageRef {
                        name: PackageName::try_new(pkg_name)?,
                        path: path.to_string(),
                    },
                );
            }
        }

        debug!(
            registry = name,
            packages = packages.len(),
            "opened registry index"
        );

        Ok(Self {
            name,
            uuid,
            repo,
            storage,
            packages,
            cache: OnceMap::new(),
        })
    }

    /// The registry's own content hash, when backed by an archive.
    pub fn tree_hash(&self) -> Option<TreeHash> {
        self.storage.tree_hash()
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.packages.contains_key(&uuid)
    }

    pub fn package_name(&self, uuid: Uuid) -> Option<&PackageName> {
        self.packages.get(&uuid).map(|r| &r.name)
    }

    /// Loads the package's data, parsing its registry files on first access.
    pub fn package(&self, uuid: Uuid) -> Result<Option<Arc<PackageData>>> {
        let Some(reference) = self.packages.get(&uuid) else {
            return Ok(None);
        };
        self.cache
            .load(uuid, || {
                PackageData::load(&self.storage, &reference.name, uuid, &reference.path)
                    .map(Arc::new)
            })
            .map(Some)
    }

    pub fn uuids_named(&self, name: &PackageName) -> Vec<Uuid> {
        self.packages
            .iter()
            .filter(|(_, r)| r.name == *name)
            .map(|(uuid, _)| *uuid)
            .collect()
    }
}

/// A merged view of one package across layered registries.
#[derive(Debug)]
pub struct PackageView {
    pub name: PackageName,
    pub uuid: Uuid,
    pub repo: Option<String>,
    pub subdir: Option<String>,
    pub versions: BTreeMap<Version, VersionInfo>,
    /// Which registry's data serves each version. When several registries
    /// carry the same version, the later one in the layering order wins.
    providers: BTreeMap<Version, Arc<PackageData>>,
}

impl PackageView {
    pub fn version_info(&self, version: &Version) -> Option<&VersionInfo> {
        self.versions.get(version)
    }

    pub fn deps_for(&self, version: &Version) -> BTreeMap<PackageName, Uuid> {
        self.providers
            .get(version)
            .map(|p| p.deps_for(version))
            .unwrap_or_default()
    }

    pub fn compat_for(&self, version: &Version) -> BTreeMap<PackageName, VersionSpec> {
        self.providers
            .get(version)
            .map(|p| p.compat_for(version))
            .unwrap_or_default()
    }

    pub fn weak_deps_for(&self, version: &Version) -> BTreeMap<PackageName, Uuid> {
        self.providers
            .get(version)
            .map(|p| p.weak_deps_for(version))
            .unwrap_or_default()
    }

    pub fn weak_compat_for(&self, version: &Version) -> BTreeMap<PackageName, VersionSpec> {
        self.providers
            .get(version)
            .map(|p| p.weak_compat_for(version))
            .unwrap_or_default()
    }
}

/// An ordered layering of registries. Lookups consult each in order.
#[derive(Debug, Default)]
pub struct RegistrySet {
    registries: Vec<RegistryIndex>,
}

impl RegistrySet {
    pub fn new(registries: Vec<RegistryIndex>) -> Self {
        Self { registries }
    }

    pub fn registries(&self) -> &[RegistryIndex] {
        &self.registries
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    /// Merges every registry's knowledge of `uuid`.
    ///
    /// Disagreement about the package's name, or about the tree hash of any
    /// shared `(uuid, version)`, is fatal.
    pub fn query(&self, uuid: Uuid) -> Result<Option<PackageView>> {
        let mut view: Option<PackageView> = None;
        for registry in &self.registries {
            let Some(data) = registry.package(uuid)? else {
                continue;
            };
            match &mut view {
                None => {
                    view = Some(PackageView {
                        name: data.name.clone(),
                        uuid,
                        repo: data.repo.clone(),
                        subdir: data.subdir.clone(),
                        versions: data.versions.clone(),
                        providers: data
                            .versions
                            .keys()
                            .map(|v| (v.clone(), data.clone()))
                            .collect(),
                    });
                }
                Some(view) => {
                    if view.name != data.name {
                        return Err(RegistryError::NameMismatch {
                            uuid,
                            first: view.name.clone(),
                            second: data.name.clone(),
                        }
                        .into());
                    }
                    for (version, info) in &data.versions {
                        if let Some(existing) = view.versions.get(version) {
                            if existing.tree_hash != info.tree_hash {
                                return Err(RegistryError::HashMismatch {
                                    name: view.name.clone(),
                                    uuid,
                                    version: version.clone(),
                                    first: existing.tree_hash,
                                    second: info.tree_hash,
                                }
                                .into());
                            }
                        }
                        view.versions.insert(version.clone(), *info);
                        view.providers.insert(version.clone(), data.clone());
                    }
                    if view.repo.is_none() {
                        view.repo = data.repo.clone();
                    }
                    if view.subdir.is_none() {
                        view.subdir = data.subdir.clone();
                    }
                }
            }
        }
        Ok(view)
    }

    /// All UUIDs carrying the given name, across every registry.
    pub fn uuids_named(&self, name: &PackageName) -> Vec<Uuid> {
        let mut uuids: Vec<Uuid> = self
            .registries
            .iter()
            .flat_map(|r| r.uuids_named(name))
            .collect();
        uuids.sort();
        uuids.dedup();
        uuids
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use camino::Utf8PathBuf;

    use crate::internal::fsx;

    /// Writes a throwaway registry directory from `(relative path, contents)`
    /// pairs and returns its root.
    pub fn write_registry(root: &Utf8PathBuf, files: &[(&str, &str)]) {
        for (rel, content) in files {
            let path = root.join(rel);
            fsx::create_dir_all(path.parent().unwrap()).unwrap();
            fsx::write(&path, content).unwrap();
        }
    }

    pub const EXAMPLE_UUID: &str = "7876af07-990d-54b4-ab0e-23690620f79a";

    /// A minimal registry with one package, `Example`, at 0.5.0, 0.5.1, 0.6.0.
    pub fn example_registry(root: &Utf8PathBuf) {
        write_registry(
            root,
            &[
                (
                    "Registry.toml",
                    r#"
name = "TestRegistry"
uuid = "23338594-aafe-5451-b93e-139f81909106"

[packages]
7876af07-990d-54b4-ab0e-23690620f79a = { name = "Example", path = "E/Example" }
"#,
                ),
                (
                    "E/Example/Package.toml",
                    r#"
name = "Example"
uuid = "7876af07-990d-54b4-ab0e-23690620f79a"
repo = "https://example.com/Example.jl.git"
"#,
                ),
                (
                    "E/Example/Versions.toml",
                    r#"
["0.5.0"]
git-tree-sha1 = "0000000000000000000000000000000000000050"

["0.5.1"]
git-tree-sha1 = "0000000000000000000000000000000000000051"

["0.6.0"]
git-tree-sha1 = "0000000000000000000000000000000000000060"
"#,
                ),
                (
                    "E/Example/Compat.toml",
                    r#"
["0.5-0.6"]
julia = "1"
"#,
                ),
            ],
        );
    }
}
