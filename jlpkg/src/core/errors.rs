use itertools::Itertools;
use semver::Version;
use thiserror::Error;

use crate::core::{PackageName, TreeHash, Uuid, VersionSpec};

/// Malformed user input: version specs, package specs, UUIDs.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("invalid version spec `{spec}`: {reason}")]
    InvalidVersionSpec { spec: String, reason: String },
    #[error("invalid package spec `{spec}`: {reason}")]
    InvalidPackageSpec { spec: String, reason: String },
    #[error("invalid UUID `{uuid}`: {reason}")]
    BadUuid { uuid: String, reason: String },
}

/// Problems with registry contents, detected while reading the catalog.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to parse registry file `{path}`: {reason}")]
    Parse { path: String, reason: String },
    #[error("package `{name}` [{uuid}] not found in any registry")]
    MissingPackage { name: PackageName, uuid: Uuid },
    #[error(
        "registries disagree about the tree hash of {name} [{uuid}] v{version}: \
         {first} != {second}"
    )]
    HashMismatch {
        name: PackageName,
        uuid: Uuid,
        version: Version,
        first: TreeHash,
        second: TreeHash,
    },
    #[error("registries disagree about the name of [{uuid}]: `{first}` != `{second}`")]
    NameMismatch {
        uuid: Uuid,
        first: PackageName,
        second: PackageName,
    },
    #[error(
        "overlapping ranges in `{file}` of {name}: version {version} receives \
         conflicting entries for `{key}`"
    )]
    OverlappingCompat {
        name: PackageName,
        file: String,
        version: Version,
        key: String,
    },
}

/// The resolver could not produce, or refused to produce, an assignment.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error(
        "unsatisfiable requirements for {name} [{uuid}]: \
         restricted to {requested}, available: {}",
        format_versions(available)
    )]
    Unsatisfiable {
        uuid: Uuid,
        name: PackageName,
        requested: VersionSpec,
        available: Vec<Version>,
    },
    #[error("unknown package `{name}`{}", match uuid {
        Some(uuid) => format!(" [{uuid}]"),
        None => String::new(),
    })]
    UnknownPackage {
        name: PackageName,
        uuid: Option<Uuid>,
    },
    #[error("{name} [{uuid}] v{version} is yanked and cannot be kept without pinning")]
    YankedPinned {
        uuid: Uuid,
        name: PackageName,
        version: Version,
    },
    #[error("fixed packages form a dependency cycle with contradictory requirements: {names}")]
    Cycle { names: String },
}

/// Content hashes did not line up.
#[derive(Debug, Error)]
pub enum HashError {
    #[error("hash mismatch for `{path}`: expected {expected}, computed {computed}")]
    Mismatch {
        path: String,
        expected: String,
        computed: String,
    },
    #[error("hash of `{path}` still mismatched after redownload")]
    MismatchAfterRetry { path: String },
}

/// A project/manifest invariant violation detected on read or before write.
#[derive(Debug, Error)]
#[error("environment is inconsistent: {reason}")]
pub struct ConflictError {
    pub reason: String,
}

impl ConflictError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

fn format_versions(versions: &[Version]) -> String {
    if versions.is_empty() {
        return "none".into();
    }
    versions.iter().map(ToString::to_string).join(", ")
}

#[cfg(test)]
mod tests {
    use semver::Version;

    use super::ResolverError;
    use crate::core::{PackageName, Uuid, VersionSpec};

    #[test]
    fn unsatisfiable_names_the_conflict() {
        let err = ResolverError::Unsatisfiable {
            uuid: Uuid::parse("7876af07-990d-54b4-ab0e-23690620f79a").unwrap(),
            name: PackageName::new("Example"),
            requested: VersionSpec::parse("^2").unwrap(),
            available: vec![Version::new(1, 0, 0), Version::new(1, 1, 0)],
        };
        let msg = err.to_string();
        assert!(msg.contains("Example"));
        assert!(msg.contains("7876af07"));
        assert!(msg.contains("1.0.0, 1.1.0"));
    }
}
