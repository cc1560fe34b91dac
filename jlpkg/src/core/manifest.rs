//! The fully-resolved, reproducible dependency graph of an environment.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{anyhow, bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use semver::Version;
use toml::value::{Table, Value};

use crate::core::source::{EntrySource, RepoLocation};
use crate::core::{ConflictError, PackageName, Project, TreeHash, Uuid};
use crate::internal::fsx;

pub const MANIFEST_FORMAT: &str = "2.0";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ManifestFormat {
    /// Flat legacy format without the `manifest_format` marker.
    V1,
    #[default]
    V2,
}

/// A single resolved package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestEntry {
    pub name: PackageName,
    pub version: Option<Version>,
    pub source: Option<EntrySource>,
    pub pinned: bool,
    pub deps: BTreeMap<PackageName, Uuid>,
    pub extensions: BTreeMap<String, Vec<PackageName>>,
}

impl ManifestEntry {
    pub fn new(name: PackageName) -> Self {
        Self {
            name,
            version: None,
            source: None,
            pinned: false,
            deps: BTreeMap::new(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn tree_hash(&self) -> Option<TreeHash> {
        self.source.as_ref().and_then(|s| s.tree_hash())
    }

    pub fn is_tracking_path(&self) -> bool {
        matches!(self.source, Some(EntrySource::Path(_)))
    }

    pub fn is_tracking_repo(&self) -> bool {
        matches!(self.source, Some(EntrySource::Repo { .. }))
    }

    /// Stdlib entries carry no source at all.
    pub fn is_stdlib(&self) -> bool {
        self.source.is_none()
    }
}

/// Map `UUID → ManifestEntry` plus a format version and a host-version marker.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Manifest {
    pub format: ManifestFormat,
    pub julia_version: Option<Version>,
    pub entries: BTreeMap<Uuid, ManifestEntry>,
}

impl Manifest {
    pub fn read(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = fsx::read_to_string(path)?;
        Self::parse(&content).with_context(|| format!("failed to parse manifest at {path}"))
    }

    pub fn write(&self, path: impl AsRef<Utf8Path>) -> Result<()> {
        fsx::write_atomic(path.as_ref(), self.render()?)
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let root: Table = toml::from_str(content).context("invalid TOML")?;

        let (format, julia_version, packages) = if root.contains_key("manifest_format") {
            let julia_version = root
                .get("julia_version")
                .map(|v| parse_version_value("julia_version", v))
                .transpose()?;
            let packages = match root.get("deps") {
                None => Table::new(),
                Some(Value::Table(table)) => table.clone(),
                Some(_) => bail!("`deps` must be a table of package sections"),
            };
            (ManifestFormat::V2, julia_version, packages)
        } else {
            // Legacy flat format: every top-level key is a package section.
            // Auto-upgraded to v2 on first write.
            let mut packages = Table::new();
            for (key, val) in &root {
                packages.insert(key.clone(), val.clone());
            }
            (ManifestFormat::V1, None, packages)
        };

        let mut manifest = Self {
            format,
            julia_version,
            entries: BTreeMap::new(),
        };

        // Entries whose `deps` were written in the abbreviated array-of-names
        // form; resolved in a second pass once every UUID is known.
        let mut deferred_deps: Vec<(Uuid, Vec<PackageName>)> = Vec::new();

        for (name, sections) in &packages {
            let name = PackageName::try_new(name)?;
            let sections = match sections {
                Value::Array(array) => array.clone(),
                // A plain table is tolerated as a single-entry section.
                Value::Table(table) => vec![Value::Table(table.clone())],
                _ => bail!("manifest section `{name}` must be an array of tables"),
            };
            for section in sections {
                let Value::Table(section) = section else {
                    bail!("manifest section `{name}` must contain tables");
                };
                let (uuid, entry, deferred) = parse_entry(name.clone(), &section)?;
                if manifest.entries.insert(uuid, entry).is_some() {
                    bail!("duplicate manifest entry for UUID {uuid}");
                }
                if let Some(names) = deferred {
                    deferred_deps.push((uuid, names));
                }
            }
        }

        for (uuid, names) in deferred_deps {
            let mut deps = BTreeMap::new();
            for dep_name in names {
                let matches: Vec<Uuid> = manifest
                    .entries
                    .iter()
                    .filter(|(_, e)| e.name == dep_name)
                    .map(|(u, _)| *u)
                    .collect();
                match matches.as_slice() {
                    [dep_uuid] => {
                        deps.insert(dep_name, *dep_uuid);
                    }
                    [] => bail!("manifest names unknown dependency `{dep_name}`"),
                    _ => bail!(
                        "dependency name `{dep_name}` is ambiguous; manifest must \
                         spell out its UUID"
                    ),
                }
            }
            manifest.entries.get_mut(&uuid).unwrap().deps = deps;
        }

        manifest.validate()?;
        Ok(manifest)
    }

    /// Serializes in v2 format. Output is deterministic: rendering the same
    /// manifest twice yields identical bytes.
    pub fn render(&self) -> Result<String> {
        self.validate()?;

        let mut root = Table::new();
        if let Some(julia_version) = &self.julia_version {
            root.insert(
                "julia_version".into(),
                Value::String(julia_version.to_string()),
            );
        }
        root.insert(
            "manifest_format".into(),
            Value::String(MANIFEST_FORMAT.into()),
        );

        let mut packages = Table::new();
        let mut by_name: BTreeMap<&PackageName, Vec<(&Uuid, &ManifestEntry)>> = BTreeMap::new();
        for (uuid, entry) in &self.entries {
            by_name.entry(&entry.name).or_default().push((uuid, entry));
        }
        for (name, mut group) in by_name {
            group.sort_by_key(|(uuid, _)| **uuid);
            let sections: Vec<Value> = group
                .into_iter()
                .map(|(uuid, entry)| Value::Table(render_entry(uuid, entry)))
                .collect();
            packages.insert(name.to_string(), Value::Array(sections));
        }
        if !packages.is_empty() {
            root.insert("deps".into(), Value::Table(packages));
        }

        Ok(toml::to_string(&Value::Table(root))?)
    }

    /// Enforces the manifest invariants; called on read and on every write.
    pub fn validate(&self) -> Result<()> {
        for (uuid, entry) in &self.entries {
            for (dep_name, dep_uuid) in &entry.deps {
                let Some(dep_entry) = self.entries.get(dep_uuid) else {
                    return Err(ConflictError::new(format!(
                        "{} [{uuid}] depends on `{dep_name}` [{dep_uuid}] which is \
                         not in the manifest",
                        entry.name
                    ))
                    .into());
                };
                if dep_entry.name != *dep_name {
                    return Err(ConflictError::new(format!(
                        "{} [{uuid}] calls [{dep_uuid}] `{dep_name}` but the manifest \
                         names it `{}`",
                        entry.name, dep_entry.name
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Additionally checks that every direct dep of the project is present.
    pub fn validate_against(&self, project: &Project) -> Result<()> {
        self.validate()?;
        for (name, uuid) in &project.deps {
            if !self.entries.contains_key(uuid) {
                return Err(ConflictError::new(format!(
                    "direct dependency `{name}` [{uuid}] is missing from the manifest"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Keeps only entries reachable from `roots` through dependency edges.
    pub fn prune(&mut self, roots: impl IntoIterator<Item = Uuid>) {
        let mut keep: BTreeSet<Uuid> = BTreeSet::new();
        let mut queue: VecDeque<Uuid> = roots.into_iter().collect();
        while let Some(uuid) = queue.pop_front() {
            if !keep.insert(uuid) {
                continue;
            }
            if let Some(entry) = self.entries.get(&uuid) {
                queue.extend(entry.deps.values().copied());
            }
        }
        self.entries.retain(|uuid, _| keep.contains(uuid));
    }

    pub fn entries_named<'a>(
        &'a self,
        name: &PackageName,
    ) -> impl Iterator<Item = (&'a Uuid, &'a ManifestEntry)> + 'a {
        let name = name.clone();
        self.entries.iter().filter(move |(_, e)| e.name == name)
    }

    /// Finds the single entry with the given name, erroring on ambiguity.
    pub fn find_by_name(&self, name: &PackageName) -> Result<Option<(Uuid, &ManifestEntry)>> {
        let matches: Vec<_> = self.entries_named(name).collect();
        match matches.as_slice() {
            [] => Ok(None),
            [(uuid, entry)] => Ok(Some((**uuid, entry))),
            _ => bail!(
                "package name `{name}` is ambiguous in the manifest; \
                 disambiguate with `{name}=<uuid>`"
            ),
        }
    }
}

fn parse_version_value(key: &str, value: &Value) -> Result<Version> {
    let s = value
        .as_str()
        .ok_or_else(|| anyhow!("`{key}` must be a string"))?;
    Version::parse(s).map_err(|e| anyhow!("invalid `{key}` `{s}`: {e}"))
}

type DeferredDeps = Option<Vec<PackageName>>;

fn parse_entry(
    name: PackageName,
    section: &Table,
) -> Result<(Uuid, ManifestEntry, DeferredDeps)> {
    let get_str = |key: &str| -> Result<Option<String>> {
        match section.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| anyhow!("`{key}` of `{name}` must be a string")),
        }
    };

    let uuid = get_str("uuid")?
        .ok_or_else(|| anyhow!("manifest entry `{name}` is missing its UUID"))?;
    let uuid = Uuid::parse(&uuid)?;

    let version = get_str("version")?
        .map(|s| Version::parse(&s).map_err(|e| anyhow!("invalid version of `{name}`: {e}")))
        .transpose()?;

    let tree_hash = get_str("git-tree-sha1")?
        .map(|s| TreeHash::parse(&s))
        .transpose()?;
    let path = get_str("path")?.map(Utf8PathBuf::from);
    let repo_url = get_str("repo-url")?;

    let source = match (path, repo_url, tree_hash) {
        (Some(path), None, None) => Some(EntrySource::Path(path)),
        (None, Some(url), tree_hash) => {
            let rev = get_str("repo-rev")?
                .ok_or_else(|| anyhow!("repo-tracked entry `{name}` is missing `repo-rev`"))?;
            Some(EntrySource::Repo {
                location: RepoLocation {
                    url,
                    rev,
                    subdir: get_str("repo-subdir")?,
                },
                tree_hash,
            })
        }
        (None, None, Some(hash)) => Some(EntrySource::Tree(hash)),
        (None, None, None) => None,
        _ => {
            return Err(ConflictError::new(format!(
                "manifest entry `{name}` mixes `path` with other source identifiers"
            ))
            .into())
        }
    };

    let pinned = match section.get("pinned") {
        None => false,
        Some(Value::Boolean(b)) => *b,
        Some(_) => bail!("`pinned` of `{name}` must be a boolean"),
    };

    let mut deps = BTreeMap::new();
    let mut deferred = None;
    match section.get("deps") {
        None => {}
        Some(Value::Table(table)) => {
            for (dep_name, dep_uuid) in table {
                let dep_uuid = dep_uuid
                    .as_str()
                    .ok_or_else(|| anyhow!("dep `{dep_name}` of `{name}` must be a UUID string"))?;
                deps.insert(PackageName::try_new(dep_name)?, Uuid::parse(dep_uuid)?);
            }
        }
        Some(Value::Array(array)) => {
            let mut names = Vec::with_capacity(array.len());
            for element in array {
                let dep_name = element
                    .as_str()
                    .ok_or_else(|| anyhow!("deps of `{name}` contain a non-string entry"))?;
                names.push(PackageName::try_new(dep_name)?);
            }
            deferred = Some(names);
        }
        Some(_) => bail!("deps of `{name}` must be a table or an array of names"),
    }

    let mut extensions = BTreeMap::new();
    if let Some(value) = section.get("extensions") {
        let Value::Table(table) = value else {
            bail!("extensions of `{name}` must be a table");
        };
        for (ext, triggers) in table {
            let triggers = match triggers {
                Value::String(s) => vec![PackageName::try_new(s)?],
                Value::Array(array) => {
                    let mut out = Vec::with_capacity(array.len());
                    for t in array {
                        let t = t.as_str().ok_or_else(|| {
                            anyhow!("extension `{ext}` of `{name}` has a non-string trigger")
                        })?;
                        out.push(PackageName::try_new(t)?);
                    }
                    out
                }
                _ => bail!("extension `{ext}` of `{name}` must name its triggers"),
            };
            extensions.insert(ext.clone(), triggers);
        }
    }

    let entry = ManifestEntry {
        name,
        version,
        source,
        pinned,
        deps,
        extensions,
    };
    Ok((uuid, entry, deferred))
}

fn render_entry(uuid: &Uuid, entry: &ManifestEntry) -> Table {
    let mut table = Table::new();

    if !entry.deps.is_empty() {
        let mut deps = Table::new();
        for (dep_name, dep_uuid) in &entry.deps {
            deps.insert(dep_name.to_string(), Value::String(dep_uuid.to_string()));
        }
        table.insert("deps".into(), Value::Table(deps));
    }

    if !entry.extensions.is_empty() {
        let mut extensions = Table::new();
        for (ext, triggers) in &entry.extensions {
            let triggers = triggers
                .iter()
                .map(|t| Value::String(t.to_string()))
                .collect();
            extensions.insert(ext.clone(), Value::Array(triggers));
        }
        table.insert("extensions".into(), Value::Table(extensions));
    }

    match &entry.source {
        Some(EntrySource::Tree(hash)) => {
            table.insert("git-tree-sha1".into(), Value::String(hash.to_string()));
        }
        Some(EntrySource::Path(path)) => {
            table.insert("path".into(), Value::String(path.to_string()));
        }
        Some(EntrySource::Repo {
            location,
            tree_hash,
        }) => {
            if let Some(hash) = tree_hash {
                table.insert("git-tree-sha1".into(), Value::String(hash.to_string()));
            }
            table.insert("repo-url".into(), Value::String(location.url.clone()));
            table.insert("repo-rev".into(), Value::String(location.rev.clone()));
            if let Some(subdir) = &location.subdir {
                table.insert("repo-subdir".into(), Value::String(subdir.clone()));
            }
        }
        None => {}
    }

    if entry.pinned {
        table.insert("pinned".into(), Value::Boolean(true));
    }

    table.insert("uuid".into(), Value::String(uuid.to_string()));

    if let Some(version) = &entry.version {
        table.insert("version".into(), Value::String(version.to_string()));
    }

    table
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use semver::Version;
    use similar_asserts::assert_eq;

    use super::{Manifest, ManifestEntry, ManifestFormat};
    use crate::core::source::EntrySource;
    use crate::core::{PackageName, TreeHash, Uuid};

    fn uuid(n: u8) -> Uuid {
        Uuid::parse(&format!("00000000-0000-0000-0000-0000000000{n:02x}")).unwrap()
    }

    fn tree(n: u8) -> TreeHash {
        TreeHash::parse(&format!("{:038x}{n:02x}", 0)).unwrap()
    }

    fn entry(name: &str, version: &str, hash: TreeHash) -> ManifestEntry {
        ManifestEntry {
            version: Some(Version::parse(version).unwrap()),
            source: Some(EntrySource::Tree(hash)),
            ..ManifestEntry::new(PackageName::new(name))
        }
    }

    #[test]
    fn render_parse_round_trip() {
        let mut manifest = Manifest {
            julia_version: Some(Version::new(1, 10, 0)),
            ..Manifest::default()
        };
        let mut a = entry("Alpha", "1.2.0", tree(1));
        a.deps.insert(PackageName::new("Beta"), uuid(2));
        manifest.entries.insert(uuid(1), a);
        manifest.entries.insert(uuid(2), entry("Beta", "0.3.1", tree(2)));

        let rendered = manifest.render().unwrap();
        let reparsed = Manifest::parse(&rendered).unwrap();
        assert_eq!(reparsed, manifest);

        // Deterministic output: a second render is byte-identical.
        assert_eq!(reparsed.render().unwrap(), rendered);
    }

    #[test]
    fn v1_manifest_is_upgraded() {
        let content = indoc! {r#"
            [[Example]]
            uuid = "00000000-0000-0000-0000-000000000001"
            version = "0.5.1"
            git-tree-sha1 = "0000000000000000000000000000000000000001"
        "#};
        let manifest = Manifest::parse(content).unwrap();
        assert_eq!(manifest.format, ManifestFormat::V1);
        let rendered = manifest.render().unwrap();
        assert!(rendered.contains(r#"manifest_format = "2.0""#));
        assert!(rendered.contains("[[deps.Example]]"));
    }

    #[test]
    fn deps_array_form_resolves_by_name() {
        let content = indoc! {r#"
            manifest_format = "2.0"

            [[deps.Alpha]]
            uuid = "00000000-0000-0000-0000-000000000001"
            version = "1.0.0"
            git-tree-sha1 = "0000000000000000000000000000000000000001"
            deps = ["Beta"]

            [[deps.Beta]]
            uuid = "00000000-0000-0000-0000-000000000002"
            version = "2.0.0"
            git-tree-sha1 = "0000000000000000000000000000000000000002"
        "#};
        let manifest = Manifest::parse(content).unwrap();
        let alpha = &manifest.entries[&uuid(1)];
        assert_eq!(alpha.deps[&PackageName::new("Beta")], uuid(2));
    }

    #[test]
    fn dangling_dep_is_rejected() {
        let content = indoc! {r#"
            manifest_format = "2.0"

            [[deps.Alpha]]
            uuid = "00000000-0000-0000-0000-000000000001"
            git-tree-sha1 = "0000000000000000000000000000000000000001"

            [deps.Alpha.deps]
            Beta = "00000000-0000-0000-0000-0000000000ff"
        "#};
        assert!(Manifest::parse(content).is_err());
    }

    #[test]
    fn same_name_different_uuids_is_legal() {
        let mut manifest = Manifest::default();
        manifest.entries.insert(uuid(1), entry("Twin", "1.0.0", tree(1)));
        manifest.entries.insert(uuid(2), entry("Twin", "2.0.0", tree(2)));
        let rendered = manifest.render().unwrap();
        let reparsed = Manifest::parse(&rendered).unwrap();
        assert_eq!(reparsed.entries.len(), 2);
        assert!(reparsed
            .find_by_name(&PackageName::new("Twin"))
            .is_err());
    }

    #[test]
    fn prune_drops_unreachable() {
        let mut manifest = Manifest::default();
        let mut a = entry("Alpha", "1.0.0", tree(1));
        a.deps.insert(PackageName::new("Beta"), uuid(2));
        manifest.entries.insert(uuid(1), a);
        manifest.entries.insert(uuid(2), entry("Beta", "1.0.0", tree(2)));
        manifest.entries.insert(uuid(3), entry("Orphan", "1.0.0", tree(3)));

        manifest.prune([uuid(1)]);
        assert!(manifest.entries.contains_key(&uuid(1)));
        assert!(manifest.entries.contains_key(&uuid(2)));
        assert!(!manifest.entries.contains_key(&uuid(3)));
    }

    #[test]
    fn path_entry_has_no_version_requirement() {
        let content = indoc! {r#"
            manifest_format = "2.0"

            [[deps.Local]]
            uuid = "00000000-0000-0000-0000-000000000001"
            path = "/local/Foo"
        "#};
        let manifest = Manifest::parse(content).unwrap();
        let local = &manifest.entries[&uuid(1)];
        assert!(local.is_tracking_path());
        assert!(local.version.is_none());
        assert!(local.tree_hash().is_none());
    }

    #[test]
    fn mixed_source_identifiers_are_rejected() {
        let content = indoc! {r#"
            manifest_format = "2.0"

            [[deps.Bad]]
            uuid = "00000000-0000-0000-0000-000000000001"
            path = "/local/Bad"
            git-tree-sha1 = "0000000000000000000000000000000000000001"
        "#};
        assert!(Manifest::parse(content).is_err());
    }

    #[test]
    fn repo_entry_keeps_tree_hash() {
        let content = indoc! {r#"
            manifest_format = "2.0"

            [[deps.Remote]]
            uuid = "00000000-0000-0000-0000-000000000001"
            repo-url = "https://example.com/Remote.jl"
            repo-rev = "main"
            git-tree-sha1 = "0000000000000000000000000000000000000001"
            version = "1.0.0"
        "#};
        let manifest = Manifest::parse(content).unwrap();
        let remote = &manifest.entries[&uuid(1)];
        assert!(remote.is_tracking_repo());
        assert_eq!(remote.tree_hash(), Some(tree(1)));
        let rendered = manifest.render().unwrap();
        assert_eq!(Manifest::parse(&rendered).unwrap(), manifest);
    }
}
