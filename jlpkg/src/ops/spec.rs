//! Package spec parsing for the command surface.
//!
//! Accepted shapes: `name`, `uuid`, `name=uuid`, each optionally followed by
//! `@versionspec` or `#rev`; or a filesystem path or URL alternative.

use std::str::FromStr;

use anyhow::{bail, Result};
use camino::Utf8PathBuf;

use crate::core::{PackageName, Uuid, VersionSpec};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageSpec {
    pub name: Option<PackageName>,
    pub uuid: Option<Uuid>,
    pub version: Option<VersionSpec>,
    /// The version text exactly as the user wrote it; recorded in `[compat]`.
    pub version_raw: Option<String>,
    pub rev: Option<String>,
    pub path: Option<Utf8PathBuf>,
    pub url: Option<String>,
    pub subdir: Option<String>,
}

impl PackageSpec {
    pub fn by_name(name: PackageName) -> Self {
        Self {
            name: Some(name),
            ..Default::default()
        }
    }

    /// A human label for error messages.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.to_string();
        }
        if let Some(uuid) = &self.uuid {
            return uuid.to_string();
        }
        if let Some(url) = &self.url {
            return url.clone();
        }
        if let Some(path) = &self.path {
            return path.to_string();
        }
        "<empty spec>".to_string()
    }

    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("empty package spec");
        }

        // URL and path alternatives; a `#rev` suffix selects a revision.
        if s.contains("://") || s.starts_with("git@") {
            let (url, rev) = split_suffix(s, '#');
            if !url.starts_with("git@") {
                url::Url::parse(url).map_err(|e| anyhow::anyhow!("invalid URL `{url}`: {e}"))?;
            }
            return Ok(Self {
                url: Some(url.to_string()),
                rev: rev.map(str::to_string),
                ..Default::default()
            });
        }
        if s.starts_with('.') || s.starts_with('/') || s.starts_with('~') {
            return Ok(Self {
                path: Some(Utf8PathBuf::from(s)),
                ..Default::default()
            });
        }

        let (s, rev) = split_suffix(s, '#');
        let (s, version) = split_suffix(s, '@');
        if rev.is_some() && version.is_some() {
            bail!("package spec cannot have both `@version` and `#rev`");
        }
        let version_raw = version.map(|v| v.trim().to_string());
        let version = version_raw
            .as_deref()
            .map(VersionSpec::parse)
            .transpose()?;

        let mut spec = Self {
            version,
            version_raw,
            rev: rev.map(str::to_string),
            ..Default::default()
        };

        match s.split_once('=') {
            Some((name, uuid)) => {
                spec.name = Some(PackageName::try_new(name.trim())?);
                spec.uuid = Some(Uuid::parse(uuid.trim())?);
            }
            None => {
                // A bare token is a UUID when it parses as one, else a name.
                if let Ok(uuid) = Uuid::parse(s) {
                    spec.uuid = Some(uuid);
                } else {
                    spec.name = Some(PackageName::try_new(s)?);
                }
            }
        }
        Ok(spec)
    }
}

fn split_suffix(s: &str, sep: char) -> (&str, Option<&str>) {
    match s.split_once(sep) {
        Some((head, tail)) => (head.trim(), Some(tail.trim())),
        None => (s, None),
    }
}

impl FromStr for PackageSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::PackageSpec;
    use crate::core::{PackageName, Uuid, VersionSpec};

    #[test]
    fn bare_name() {
        let spec: PackageSpec = "Example".parse().unwrap();
        assert_eq!(spec.name, Some(PackageName::new("Example")));
        assert!(spec.uuid.is_none());
    }

    #[test]
    fn bare_uuid() {
        let spec: PackageSpec = "7876af07-990d-54b4-ab0e-23690620f79a".parse().unwrap();
        assert_eq!(
            spec.uuid,
            Some(Uuid::parse("7876af07-990d-54b4-ab0e-23690620f79a").unwrap())
        );
        assert!(spec.name.is_none());
    }

    #[test]
    fn name_uuid_version() {
        let spec: PackageSpec = "Example=7876af07-990d-54b4-ab0e-23690620f79a@0.5"
            .parse()
            .unwrap();
        assert_eq!(spec.name, Some(PackageName::new("Example")));
        assert!(spec.uuid.is_some());
        assert_eq!(spec.version, Some(VersionSpec::parse("0.5").unwrap()));
    }

    #[test]
    fn name_with_rev() {
        let spec: PackageSpec = "Example#main".parse().unwrap();
        assert_eq!(spec.name, Some(PackageName::new("Example")));
        assert_eq!(spec.rev.as_deref(), Some("main"));
    }

    #[test]
    fn url_with_rev() {
        let spec: PackageSpec = "https://example.com/Foo.jl.git#v1.2".parse().unwrap();
        assert_eq!(spec.url.as_deref(), Some("https://example.com/Foo.jl.git"));
        assert_eq!(spec.rev.as_deref(), Some("v1.2"));
    }

    #[test]
    fn relative_path() {
        let spec: PackageSpec = "./local/Foo".parse().unwrap();
        assert_eq!(spec.path.as_deref().map(|p| p.as_str()), Some("./local/Foo"));
    }

    #[test_case(""; "empty")]
    #[test_case("Example@1.0#main"; "version and rev")]
    #[test_case("bad name@1"; "space in name")]
    fn rejects(s: &str) {
        assert!(s.parse::<PackageSpec>().is_err());
    }
}
