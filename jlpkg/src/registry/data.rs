//! Lazily parsed per-package registry data.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use semver::Version;
use toml::value::{Table, Value};

use crate::core::uuid::JULIA_UUID;
use crate::core::{PackageName, TreeHash, Uuid, VersionRange, VersionSpec};
use crate::registry::compress::{expand, CompressedRow};
use crate::registry::storage::RegistryStorage;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VersionInfo {
    pub tree_hash: TreeHash,
    pub yanked: bool,
}

/// Everything a registry knows about one package, with the range-compressed
/// compat and deps tables already expanded per version.
#[derive(Debug)]
pub struct PackageData {
    pub name: PackageName,
    pub uuid: Uuid,
    pub repo: Option<String>,
    pub subdir: Option<String>,
    pub versions: BTreeMap<Version, VersionInfo>,
    deps: BTreeMap<Version, BTreeMap<PackageName, Uuid>>,
    compat: BTreeMap<Version, BTreeMap<PackageName, VersionSpec>>,
    weak_deps: BTreeMap<Version, BTreeMap<PackageName, Uuid>>,
    weak_compat: BTreeMap<Version, BTreeMap<PackageName, VersionSpec>>,
}

impl PackageData {
    /// Dependency edges of one version. Always contains the host-language
    /// anchor.
    pub fn deps_for(&self, version: &Version) -> BTreeMap<PackageName, Uuid> {
        let mut deps = self.deps.get(version).cloned().unwrap_or_default();
        deps.insert(PackageName::JULIA, JULIA_UUID);
        deps
    }

    /// Compat constraints of one version. A dep name missing here defaults to
    /// the unbounded spec.
    pub fn compat_for(&self, version: &Version) -> BTreeMap<PackageName, VersionSpec> {
        self.compat.get(version).cloned().unwrap_or_default()
    }

    pub fn weak_deps_for(&self, version: &Version) -> BTreeMap<PackageName, Uuid> {
        self.weak_deps.get(version).cloned().unwrap_or_default()
    }

    pub fn weak_compat_for(&self, version: &Version) -> BTreeMap<PackageName, VersionSpec> {
        self.weak_compat.get(version).cloned().unwrap_or_default()
    }

    pub fn load(
        storage: &RegistryStorage,
        expected_name: &PackageName,
        expected_uuid: Uuid,
        dir: &str,
    ) -> Result<Self> {
        let package_toml = read_table(storage, dir, "Package.toml")?
            .ok_or_else(|| anyhow!("registry entry `{dir}` is missing Package.toml"))?;

        let name = package_toml
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Package.toml of `{dir}` is missing `name`"))?;
        let name = PackageName::try_new(name)?;
        let uuid = package_toml
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Package.toml of `{dir}` is missing `uuid`"))?;
        let uuid = Uuid::parse(uuid)?;

        if name != *expected_name || uuid != expected_uuid {
            bail!(
                "Package.toml of `{dir}` declares {name} [{uuid}], but the registry \
                 lists {expected_name} [{expected_uuid}]"
            );
        }

        let repo = package_toml
            .get("repo")
            .and_then(Value::as_str)
            .map(str::to_string);
        let subdir = package_toml
            .get("subdir")
            .and_then(Value::as_str)
            .map(str::to_string);

        let versions = read_versions(storage, dir, &name)?;
        let known: Vec<Version> = versions.keys().cloned().collect();

        let deps = expand(
            &name,
            "Deps.toml",
            known.iter().cloned(),
            &read_uuid_rows(storage, dir, "Deps.toml")?,
        )?;
        let compat = expand(
            &name,
            "Compat.toml",
            known.iter().cloned(),
            &read_spec_rows(storage, dir, "Compat.toml")?,
        )?;
        let weak_deps = expand(
            &name,
            "WeakDeps.toml",
            known.iter().cloned(),
            &read_uuid_rows(storage, dir, "WeakDeps.toml")?,
        )?;
        let weak_compat = expand(
            &name,
            "WeakCompat.toml",
            known.iter().cloned(),
            &read_spec_rows(storage, dir, "WeakCompat.toml")?,
        )?;

        Ok(Self {
            name,
            uuid,
            repo,
            subdir,
            versions,
            deps: rekey(deps)?,
            compat: rekey(compat)?,
            weak_deps: rekey(weak_deps)?,
            weak_compat: rekey(weak_compat)?,
        })
    }
}

fn read_table(storage: &RegistryStorage, dir: &str, file: &str) -> Result<Option<Table>> {
    let rel = format!("{dir}/{file}");
    match storage.read_to_string(&rel)? {
        None => Ok(None),
        Some(content) => toml::from_str(&content)
            .map(Some)
            .with_context(|| format!("failed to parse registry file `{rel}`")),
    }
}

fn read_versions(
    storage: &RegistryStorage,
    dir: &str,
    name: &PackageName,
) -> Result<BTreeMap<Version, VersionInfo>> {
    let Some(table) = read_table(storage, dir, "Versions.toml")? else {
        bail!("registry entry for `{name}` is missing Versions.toml");
    };
    let mut versions = BTreeMap::new();
    for (version, info) in table {
        let version = Version::parse(&version)
            .map_err(|e| anyhow!("invalid version `{version}` of `{name}`: {e}"))?;
        let Value::Table(info) = info else {
            bail!("Versions.toml entry `{version}` of `{name}` must be a table");
        };
        let tree_hash = info
            .get("git-tree-sha1")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                anyhow!("Versions.toml entry `{version}` of `{name}` is missing `git-tree-sha1`")
            })?;
        let yanked = info.get("yanked").and_then(Value::as_bool).unwrap_or(false);
        versions.insert(
            version,
            VersionInfo {
                tree_hash: TreeHash::parse(tree_hash)?,
                yanked,
            },
        );
    }
    Ok(versions)
}

fn read_uuid_rows(
    storage: &RegistryStorage,
    dir: &str,
    file: &str,
) -> Result<Vec<CompressedRow<Uuid>>> {
    read_rows(storage, dir, file, |value| {
        let s = value
            .as_str()
            .ok_or_else(|| anyhow!("dependency value must be a UUID string"))?;
        Uuid::parse(s)
    })
}

fn read_spec_rows(
    storage: &RegistryStorage,
    dir: &str,
    file: &str,
) -> Result<Vec<CompressedRow<VersionSpec>>> {
    read_rows(storage, dir, file, |value| match value {
        Value::String(s) => {
            let range: VersionRange = s.parse()?;
            Ok(VersionSpec::from_ranges(vec![range]))
        }
        Value::Array(elements) => {
            let mut ranges = Vec::with_capacity(elements.len());
            for element in elements {
                let s = element
                    .as_str()
                    .ok_or_else(|| anyhow!("compat array must contain strings"))?;
                ranges.push(s.parse::<VersionRange>()?);
            }
            Ok(VersionSpec::from_ranges(ranges))
        }
        _ => bail!("compat value must be a string or an array of strings"),
    })
}

fn read_rows<T>(
    storage: &RegistryStorage,
    dir: &str,
    file: &str,
    parse_value: impl Fn(&Value) -> Result<T>,
) -> Result<Vec<CompressedRow<T>>> {
    let Some(table) = read_table(storage, dir, file)? else {
        return Ok(Vec::new());
    };
    let mut rows = Vec::with_capacity(table.len());
    for (range, entries) in table {
        let range: VersionRange = range
            .parse()
            .with_context(|| format!("invalid range key in `{dir}/{file}`"))?;
        let Value::Table(entries) = entries else {
            bail!("range section in `{dir}/{file}` must be a table");
        };
        let mut parsed = BTreeMap::new();
        for (key, value) in &entries {
            let value = parse_value(value)
                .with_context(|| format!("invalid entry `{key}` in `{dir}/{file}`"))?;
            parsed.insert(key.clone(), value);
        }
        rows.push(CompressedRow {
            range,
            entries: parsed,
        });
    }
    Ok(rows)
}

fn rekey<T>(
    expanded: BTreeMap<Version, BTreeMap<String, T>>,
) -> Result<BTreeMap<Version, BTreeMap<PackageName, T>>> {
    let mut out = BTreeMap::new();
    for (version, entries) in expanded {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
            map.insert(PackageName::try_new(&key)?, value);
        }
        out.insert(version, map);
    }
    Ok(out)
}
