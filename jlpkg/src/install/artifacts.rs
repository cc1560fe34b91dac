//! `Artifacts.toml` parsing and platform-aware artifact selection.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use toml::value::{Table, Value};
use walkdir::WalkDir;

use crate::core::{FileHash, TreeHash};
use crate::internal::fsx;
use crate::platform::{select_platform, Arch, CallAbi, CxxStringAbi, Libc, Platform, PlatformSpec};
use crate::ARTIFACTS_FILE_NAME;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactDownload {
    pub url: String,
    pub sha256: Option<FileHash>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactEntry {
    pub name: String,
    pub tree_hash: TreeHash,
    /// `None` for platform-independent artifacts.
    pub platform: Option<PlatformSpec>,
    pub lazy: bool,
    pub downloads: Vec<ArtifactDownload>,
}

/// Every `Artifacts.toml` within a package tree, in walk order.
pub fn find_artifacts_files(tree: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut out = Vec::new();
    for entry in WalkDir::new(tree).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_file() && entry.file_name() == ARTIFACTS_FILE_NAME {
            if let Some(path) = Utf8Path::from_path(entry.path()) {
                out.push(path.to_path_buf());
            }
        }
    }
    out.sort();
    out
}

/// All artifact tree hashes referenced anywhere in a package tree, regardless
/// of platform. Garbage collection marks every one of them reachable.
pub fn collect_artifact_hashes(tree: &Utf8Path) -> Result<Vec<TreeHash>> {
    let mut hashes = Vec::new();
    for file in find_artifacts_files(tree) {
        let entries = parse_artifacts(&fsx::read_to_string(&file)?)
            .with_context(|| format!("failed to parse `{file}`"))?;
        hashes.extend(entries.iter().map(|e| e.tree_hash));
    }
    hashes.sort();
    hashes.dedup();
    Ok(hashes)
}

/// Parses an `Artifacts.toml` document into a flat entry list.
///
/// Each top-level key names an artifact; its value is either a single table
/// (platform-independent) or an array of platform-tagged tables.
pub fn parse_artifacts(content: &str) -> Result<Vec<ArtifactEntry>> {
    let root: Table = toml::from_str(content).context("invalid TOML")?;
    let mut entries = Vec::new();
    for (name, value) in root {
        match value {
            Value::Table(table) => entries.push(parse_entry(&name, &table)?),
            Value::Array(variants) => {
                for variant in variants {
                    let Value::Table(table) = variant else {
                        bail!("artifact `{name}` variants must be tables");
                    };
                    entries.push(parse_entry(&name, &table)?);
                }
            }
            _ => bail!("artifact `{name}` must be a table or an array of tables"),
        }
    }
    Ok(entries)
}

fn parse_entry(name: &str, table: &Table) -> Result<ArtifactEntry> {
    let get_str = |key: &str| table.get(key).and_then(Value::as_str);

    let tree_hash = get_str("git-tree-sha1")
        .ok_or_else(|| anyhow!("artifact `{name}` is missing `git-tree-sha1`"))?;
    let tree_hash = TreeHash::parse(tree_hash)?;

    let lazy = table.get("lazy").and_then(Value::as_bool).unwrap_or(false);

    let platform = match get_str("os") {
        None => None,
        Some(os) => {
            let arch = get_str("arch")
                .and_then(|s| s.parse::<Arch>().ok())
                .ok_or_else(|| anyhow!("artifact `{name}` has an `os` but no valid `arch`"))?;
            let libc = get_str("libc").map(|s| match s {
                "musl" => Libc::Musl,
                _ => Libc::Glibc,
            });
            let call_abi = get_str("call_abi").and_then(|s| match s {
                "eabihf" => Some(CallAbi::Eabihf),
                _ => None,
            });
            let platform = match os {
                "linux" => Platform::Linux {
                    arch,
                    libc,
                    call_abi,
                },
                "macos" => Platform::MacOs { arch },
                "windows" => Platform::Windows { arch },
                "freebsd" => Platform::FreeBsd { arch, call_abi },
                _ => Platform::Unknown,
            };
            let mut spec = PlatformSpec::new(platform);
            spec.abi.libgfortran_version = get_str("libgfortran_version")
                .and_then(|s| s.split('.').next().and_then(|major| major.parse().ok()));
            spec.abi.libstdcxx_version = get_str("libstdcxx_version")
                .and_then(|s| s.split('.').last().and_then(|minor| minor.parse().ok()));
            spec.abi.cxxstring_abi = get_str("cxxstring_abi").and_then(|s| match s {
                "cxx03" => Some(CxxStringAbi::Cxx03),
                "cxx11" => Some(CxxStringAbi::Cxx11),
                _ => None,
            });
            Some(spec)
        }
    };

    let mut downloads = Vec::new();
    if let Some(value) = table.get("download") {
        let variants = match value {
            Value::Array(array) => array.clone(),
            Value::Table(table) => vec![Value::Table(table.clone())],
            _ => bail!("artifact `{name}` downloads must be tables"),
        };
        for variant in variants {
            let Value::Table(table) = variant else {
                bail!("artifact `{name}` downloads must be tables");
            };
            let url = table
                .get("url")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("artifact `{name}` download is missing `url`"))?;
            let sha256 = table
                .get("sha256")
                .and_then(Value::as_str)
                .map(FileHash::parse)
                .transpose()?;
            downloads.push(ArtifactDownload {
                url: url.to_string(),
                sha256,
            });
        }
    }

    Ok(ArtifactEntry {
        name: name.to_string(),
        tree_hash,
        platform,
        lazy,
        downloads,
    })
}

/// Picks, per artifact name, the variant to install on `host`.
///
/// Platform-independent variants always match. Among multiple matches the
/// sorted-last triplet wins, the same total order `select_platform` uses
/// everywhere.
pub fn select_for_host<'a>(
    entries: &'a [ArtifactEntry],
    host: &PlatformSpec,
) -> Vec<&'a ArtifactEntry> {
    let mut by_name: BTreeMap<&str, Vec<&ArtifactEntry>> = BTreeMap::new();
    for entry in entries {
        by_name.entry(&entry.name).or_default().push(entry);
    }

    let mut selected = Vec::new();
    for (_, variants) in by_name {
        let platformless = variants.iter().find(|e| e.platform.is_none());
        let tagged = select_platform(
            variants
                .iter()
                .filter_map(|e| e.platform.map(|p| (p, *e))),
            host,
        );
        if let Some(entry) = tagged.or(platformless.copied()) {
            selected.push(entry);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{parse_artifacts, select_for_host};
    use crate::platform::PlatformSpec;

    const EXAMPLE: &str = indoc! {r#"
        [data]
        git-tree-sha1 = "0000000000000000000000000000000000000001"
        lazy = true

        [[data.download]]
        url = "https://example.com/data.tar.gz"
        sha256 = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"

        [[libfoo]]
        git-tree-sha1 = "0000000000000000000000000000000000000002"
        os = "linux"
        arch = "x86_64"
        libc = "glibc"

        [[libfoo.download]]
        url = "https://example.com/libfoo-linux.tar.gz"

        [[libfoo]]
        git-tree-sha1 = "0000000000000000000000000000000000000003"
        os = "macos"
        arch = "aarch64"
    "#};

    #[test]
    fn parses_both_shapes() {
        let entries = parse_artifacts(EXAMPLE).unwrap();
        assert_eq!(entries.len(), 3);

        let data = entries.iter().find(|e| e.name == "data").unwrap();
        assert!(data.lazy);
        assert!(data.platform.is_none());
        assert_eq!(data.downloads.len(), 1);
        assert!(data.downloads[0].sha256.is_some());

        let linux = entries
            .iter()
            .find(|e| e.name == "libfoo" && e.platform.is_some())
            .unwrap();
        assert_eq!(
            linux.platform.unwrap().triplet(),
            "x86_64-linux-gnu"
        );
    }

    #[test]
    fn selection_is_per_name_and_platform_aware() {
        let entries = parse_artifacts(EXAMPLE).unwrap();
        let host = PlatformSpec::parse_triplet("x86_64-linux-gnu");
        let selected = select_for_host(&entries, &host);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().any(|e| e.name == "data"));
        let libfoo = selected.iter().find(|e| e.name == "libfoo").unwrap();
        assert_eq!(libfoo.platform.unwrap().triplet(), "x86_64-linux-gnu");

        let other_host = PlatformSpec::parse_triplet("aarch64-apple-darwin");
        let selected = select_for_host(&entries, &other_host);
        let libfoo = selected.iter().find(|e| e.name == "libfoo").unwrap();
        assert_eq!(
            libfoo.platform.unwrap().triplet(),
            "aarch64-apple-darwin"
        );
    }

    #[test]
    fn windows_host_gets_only_platformless() {
        let entries = parse_artifacts(EXAMPLE).unwrap();
        let host = PlatformSpec::parse_triplet("x86_64-w64-mingw32");
        let selected = select_for_host(&entries, &host);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "data");
    }
}
