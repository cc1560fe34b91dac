//! The user-authored project file: direct deps, compat constraints, sources.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use semver::Version;
use toml_edit::{value, Array, DocumentMut, InlineTable, Item, Table};

use crate::core::{PackageName, Uuid, VersionSpec};
use crate::internal::fsx;

/// An entry in the `[compat]` section.
///
/// The authored string is kept verbatim so that writing the project back does
/// not reformat what the user wrote.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompatEntry {
    pub raw: String,
    pub spec: VersionSpec,
}

impl CompatEntry {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let spec = VersionSpec::parse(&raw)?;
        Ok(Self { raw, spec })
    }
}

/// An entry in the `[sources]` section, overriding registry lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceSpec {
    Path {
        path: Utf8PathBuf,
    },
    Repo {
        url: String,
        rev: Option<String>,
        subdir: Option<String>,
    },
}

pub type Targets = BTreeMap<String, Vec<PackageName>>;

/// The in-memory form of a project file.
///
/// Unknown keys in the underlying TOML document are preserved verbatim on
/// write; only the sections this type models are rewritten.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: Option<PackageName>,
    pub uuid: Option<Uuid>,
    pub version: Option<Version>,
    pub deps: BTreeMap<PackageName, Uuid>,
    pub weakdeps: BTreeMap<PackageName, Uuid>,
    pub extras: BTreeMap<PackageName, Uuid>,
    pub compat: BTreeMap<PackageName, CompatEntry>,
    pub sources: BTreeMap<PackageName, SourceSpec>,
    pub targets: Targets,
    doc: DocumentMut,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            name: None,
            uuid: None,
            version: None,
            deps: BTreeMap::new(),
            weakdeps: BTreeMap::new(),
            extras: BTreeMap::new(),
            compat: BTreeMap::new(),
            sources: BTreeMap::new(),
            targets: Targets::new(),
            doc: DocumentMut::new(),
        }
    }
}

impl Project {
    pub fn read(path: impl AsRef<Utf8Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = fsx::read_to_string(path)?;
        content
            .parse()
            .with_context(|| format!("failed to parse project file at {path}"))
    }

    pub fn write(&self, path: impl AsRef<Utf8Path>) -> Result<()> {
        fsx::write_atomic(path.as_ref(), self.render())
    }

    pub fn render(&self) -> String {
        let mut doc = self.doc.clone();

        set_scalar(&mut doc, "name", self.name.as_ref().map(|n| n.to_string()));
        set_scalar(&mut doc, "uuid", self.uuid.map(|u| u.to_string()));
        set_scalar(&mut doc, "version", self.version.as_ref().map(|v| v.to_string()));

        set_string_table(
            &mut doc,
            "deps",
            self.deps.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        );
        set_string_table(
            &mut doc,
            "weakdeps",
            self.weakdeps.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        );
        set_string_table(
            &mut doc,
            "extras",
            self.extras.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        );
        set_string_table(
            &mut doc,
            "compat",
            self.compat.iter().map(|(k, v)| (k.to_string(), v.raw.clone())),
        );

        if self.sources.is_empty() {
            doc.remove("sources");
        } else {
            let mut table = Table::new();
            for (name, source) in &self.sources {
                let mut inline = InlineTable::new();
                match source {
                    SourceSpec::Path { path } => {
                        inline.insert("path", path.as_str().into());
                    }
                    SourceSpec::Repo { url, rev, subdir } => {
                        inline.insert("url", url.as_str().into());
                        if let Some(rev) = rev {
                            inline.insert("rev", rev.as_str().into());
                        }
                        if let Some(subdir) = subdir {
                            inline.insert("subdir", subdir.as_str().into());
                        }
                    }
                }
                table.insert(name.as_str(), value(inline));
            }
            doc.insert("sources", Item::Table(table));
        }

        if self.targets.is_empty() {
            doc.remove("targets");
        } else {
            let mut table = Table::new();
            for (target, names) in &self.targets {
                let mut array = Array::new();
                for name in names {
                    array.push(name.as_str());
                }
                table.insert(target, value(array));
            }
            doc.insert("targets", Item::Table(table));
        }

        doc.to_string()
    }

    /// Whether this project is itself a package.
    pub fn is_package(&self) -> bool {
        self.name.is_some() && self.uuid.is_some()
    }

    /// The compat spec declared for a direct dep, or the unbounded spec.
    pub fn compat_spec(&self, name: &PackageName) -> VersionSpec {
        self.compat
            .get(name)
            .map(|c| c.spec.clone())
            .unwrap_or_else(VersionSpec::any)
    }

    /// UUIDs that act as resolution roots: direct deps, target-only deps
    /// (looked up in `[extras]`), and everything named in `[sources]`.
    pub fn root_uuids(&self) -> Vec<(PackageName, Uuid)> {
        let mut roots: BTreeMap<PackageName, Uuid> = self.deps.clone();
        for names in self.targets.values() {
            for name in names {
                if let Some(uuid) = self.extras.get(name).or_else(|| self.deps.get(name)) {
                    roots.insert(name.clone(), *uuid);
                }
            }
        }
        for name in self.sources.keys() {
            if let Some(uuid) = self.deps.get(name).or_else(|| self.extras.get(name)) {
                roots.insert(name.clone(), *uuid);
            }
        }
        roots.into_iter().collect()
    }
}

impl FromStr for Project {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> Result<Self> {
        let doc: DocumentMut = content.parse().context("invalid TOML")?;

        let name = get_scalar(&doc, "name")?
            .map(PackageName::try_new)
            .transpose()?;
        let uuid = get_scalar(&doc, "uuid")?
            .map(|s| Uuid::parse(&s))
            .transpose()?;
        let version = get_scalar(&doc, "version")?
            .map(|s| Version::parse(&s).map_err(|e| anyhow!("invalid version `{s}`: {e}")))
            .transpose()?;

        let deps = read_name_uuid_table(&doc, "deps")?;
        let weakdeps = read_name_uuid_table(&doc, "weakdeps")?;
        let extras = read_name_uuid_table(&doc, "extras")?;

        let mut compat = BTreeMap::new();
        if let Some(table) = get_table(&doc, "compat")? {
            for (key, item) in table.iter() {
                let raw = item
                    .as_str()
                    .ok_or_else(|| anyhow!("compat entry `{key}` must be a string"))?;
                let entry = CompatEntry::parse(raw)
                    .with_context(|| format!("invalid compat entry for `{key}`"))?;
                compat.insert(PackageName::try_new(key)?, entry);
            }
        }

        let mut sources = BTreeMap::new();
        if let Some(table) = get_table(&doc, "sources")? {
            for (key, item) in table.iter() {
                let entry = read_source_spec(key, item)?;
                sources.insert(PackageName::try_new(key)?, entry);
            }
        }

        let mut targets = Targets::new();
        if let Some(table) = get_table(&doc, "targets")? {
            for (key, item) in table.iter() {
                let array = item
                    .as_array()
                    .ok_or_else(|| anyhow!("target `{key}` must be an array of names"))?;
                let mut names = Vec::with_capacity(array.len());
                for element in array.iter() {
                    let name = element
                        .as_str()
                        .ok_or_else(|| anyhow!("target `{key}` contains a non-string entry"))?;
                    names.push(PackageName::try_new(name)?);
                }
                targets.insert(key.to_string(), names);
            }
        }

        Ok(Self {
            name,
            uuid,
            version,
            deps,
            weakdeps,
            extras,
            compat,
            sources,
            targets,
            doc,
        })
    }
}

fn get_scalar(doc: &DocumentMut, key: &str) -> Result<Option<String>> {
    match doc.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| anyhow!("`{key}` must be a string")),
    }
}

fn get_table<'d>(doc: &'d DocumentMut, key: &str) -> Result<Option<&'d Table>> {
    match doc.get(key) {
        None => Ok(None),
        Some(item) => item
            .as_table()
            .map(Some)
            .ok_or_else(|| anyhow!("`[{key}]` must be a table")),
    }
}

fn read_name_uuid_table(doc: &DocumentMut, key: &str) -> Result<BTreeMap<PackageName, Uuid>> {
    let mut map = BTreeMap::new();
    if let Some(table) = get_table(doc, key)? {
        for (name, item) in table.iter() {
            let uuid = item
                .as_str()
                .ok_or_else(|| anyhow!("`{key}` entry `{name}` must be a UUID string"))?;
            map.insert(PackageName::try_new(name)?, Uuid::parse(uuid)?);
        }
    }
    Ok(map)
}

fn read_source_spec(name: &str, item: &Item) -> Result<SourceSpec> {
    let table = item
        .as_table_like()
        .ok_or_else(|| anyhow!("source entry `{name}` must be a table"))?;
    let get = |key: &str| -> Result<Option<String>> {
        match table.get(key) {
            None => Ok(None),
            Some(item) => item
                .as_str()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| anyhow!("source entry `{name}`: `{key}` must be a string")),
        }
    };
    let path = get("path")?;
    let url = get("url")?;
    match (path, url) {
        (Some(path), None) => Ok(SourceSpec::Path {
            path: Utf8PathBuf::from(path),
        }),
        (None, Some(url)) => Ok(SourceSpec::Repo {
            url,
            rev: get("rev")?,
            subdir: get("subdir")?,
        }),
        (Some(_), Some(_)) => bail!("source entry `{name}` cannot have both `path` and `url`"),
        (None, None) => bail!("source entry `{name}` must have either `path` or `url`"),
    }
}

fn set_scalar(doc: &mut DocumentMut, key: &str, val: Option<String>) {
    match val {
        Some(v) => {
            doc.insert(key, value(v));
        }
        None => {
            doc.remove(key);
        }
    }
}

fn set_string_table(
    doc: &mut DocumentMut,
    key: &str,
    entries: impl Iterator<Item = (String, String)>,
) {
    let mut table = Table::new();
    for (k, v) in entries {
        table.insert(&k, value(v));
    }
    if table.is_empty() {
        doc.remove(key);
    } else {
        doc.insert(key, Item::Table(table));
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{Project, SourceSpec};
    use crate::core::PackageName;

    const EXAMPLE: &str = indoc! {r#"
        name = "Airship"
        uuid = "7876af07-990d-54b4-ab0e-23690620f79a"
        version = "0.1.0"

        [deps]
        Example = "7876af07-990d-54b4-ab0e-23690620f79b"

        [compat]
        Example = "0.5, 0.7"

        [extras]
        Test = "8dfed614-e22c-5e08-85e1-65c5234f0b40"

        [targets]
        test = ["Test"]
    "#};

    #[test]
    fn parse_fields() {
        let project: Project = EXAMPLE.parse().unwrap();
        assert_eq!(project.name, Some(PackageName::new("Airship")));
        assert!(project.is_package());
        assert_eq!(project.deps.len(), 1);
        assert_eq!(project.compat[&PackageName::new("Example")].raw, "0.5, 0.7");
        assert_eq!(project.targets["test"], vec![PackageName::new("Test")]);
    }

    #[test]
    fn read_write_round_trip() {
        let project: Project = EXAMPLE.parse().unwrap();
        let rendered = project.render();
        let reparsed: Project = rendered.parse().unwrap();
        assert_eq!(reparsed.name, project.name);
        assert_eq!(reparsed.deps, project.deps);
        assert_eq!(reparsed.compat, project.compat);
        assert_eq!(reparsed.targets, project.targets);
    }

    #[test]
    fn unknown_keys_survive_rendering() {
        let content = indoc! {r#"
            custom_key = "survives"

            [deps]
            Example = "7876af07-990d-54b4-ab0e-23690620f79b"

            [custom_section]
            tool = "value"
        "#};
        let project: Project = content.parse().unwrap();
        let rendered = project.render();
        assert!(rendered.contains(r#"custom_key = "survives""#));
        assert!(rendered.contains("[custom_section]"));
    }

    #[test]
    fn sources_parse_both_shapes() {
        let content = indoc! {r#"
            [deps]
            Local = "11111111-2222-3333-4444-555555555555"
            Remote = "11111111-2222-3333-4444-555555555556"

            [sources]
            Local = { path = "../Local" }
            Remote = { url = "https://example.com/Remote.jl", rev = "main" }
        "#};
        let project: Project = content.parse().unwrap();
        assert_eq!(
            project.sources[&PackageName::new("Local")],
            SourceSpec::Path {
                path: "../Local".into()
            }
        );
        assert_eq!(
            project.sources[&PackageName::new("Remote")],
            SourceSpec::Repo {
                url: "https://example.com/Remote.jl".into(),
                rev: Some("main".into()),
                subdir: None,
            }
        );
        let rendered = project.render();
        let reparsed: Project = rendered.parse().unwrap();
        assert_eq!(reparsed.sources, project.sources);
    }

    #[test]
    fn empty_project_reads_as_default() {
        let project: Project = "".parse().unwrap();
        assert!(project.name.is_none());
        assert!(project.deps.is_empty());
        assert_eq!(project.render(), "");
    }

    #[test]
    fn roots_include_targets_and_sources() {
        let project: Project = EXAMPLE.parse().unwrap();
        let roots = project.root_uuids();
        let names: Vec<String> = roots.iter().map(|(n, _)| n.to_string()).collect();
        assert!(names.contains(&"Example".to_string()));
        assert!(names.contains(&"Test".to_string()));
    }
}
