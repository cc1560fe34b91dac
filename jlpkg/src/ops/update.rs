//! `up`: re-resolve with an upgrade-level ceiling on each direct dep.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::core::{Config, Uuid, VersionSpec};
use crate::ops::resolve::resolve_and_install;
use crate::ops::{Environment, OpOptions, PackageSpec};
use crate::resolver::UpgradeLevel;

/// Upgrades direct deps.
///
/// With an empty spec list every direct dep moves as far as `opts.level`
/// allows. With explicit specs, only the named deps move; every other direct
/// dep is held at its current version.
pub fn update(
    config: &Config,
    env: &mut Environment,
    specs: Vec<PackageSpec>,
    opts: &OpOptions,
) -> Result<()> {
    let mut named: Vec<Uuid> = Vec::new();
    for spec in &specs {
        let uuid = match (spec.uuid, &spec.name) {
            (Some(uuid), _) => uuid,
            (None, Some(name)) => match env.project.deps.get(name) {
                Some(uuid) => *uuid,
                None => bail!("`{name}` is not a direct dependency of the project"),
            },
            (None, None) => bail!("`up` spec names neither a package nor a UUID"),
        };
        named.push(uuid);
    }

    let mut ceilings: BTreeMap<Uuid, VersionSpec> = BTreeMap::new();
    for (_, uuid) in env.project.root_uuids() {
        let Some(entry) = env.manifest.entries.get(&uuid) else {
            continue;
        };
        let Some(previous) = &entry.version else {
            continue;
        };
        let level = if named.is_empty() || named.contains(&uuid) {
            opts.level
        } else {
            UpgradeLevel::Fixed
        };
        if let Some(ceiling) = level.ceiling_spec(previous) {
            ceilings.insert(uuid, ceiling);
        }
    }

    resolve_and_install(config, env, opts, &ceilings)
}
