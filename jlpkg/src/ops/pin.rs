//! `pin` and `free`.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::core::{Config, ResolverError, Uuid};
use crate::ops::resolve::resolve_and_install;
use crate::ops::{Environment, OpOptions, PackageSpec};
use crate::ui::Status;

fn target_uuids(env: &Environment, specs: &[PackageSpec]) -> Result<Vec<Uuid>> {
    let mut uuids = Vec::with_capacity(specs.len());
    for spec in specs {
        let uuid = match (spec.uuid, &spec.name) {
            (Some(uuid), _) => {
                if !env.manifest.entries.contains_key(&uuid) {
                    bail!("[{uuid}] is not in the manifest");
                }
                uuid
            }
            (None, Some(name)) => match env.manifest.find_by_name(name)? {
                Some((uuid, _)) => uuid,
                None => bail!("`{name}` is not in the manifest"),
            },
            (None, None) => bail!("spec names neither a package nor a UUID"),
        };
        uuids.push(uuid);
    }
    Ok(uuids)
}

/// Marks manifest entries pinned at their current version. Idempotent;
/// nothing else about the entry is touched.
pub fn pin(
    config: &Config,
    env: &mut Environment,
    specs: Vec<PackageSpec>,
    _opts: &OpOptions,
) -> Result<()> {
    if specs.is_empty() {
        bail!("`pin` needs at least one package spec");
    }
    let _lock = env.lock(config)?;

    let registries = config.depot().registries()?;
    for uuid in target_uuids(env, &specs)? {
        let entry = env.manifest.entries.get(&uuid).expect("validated above");

        // Pinning a version the registry has since yanked is refused; an
        // already-pinned entry is left alone, whatever its state.
        if !entry.pinned {
            if let (Some(version), Some(view)) = (&entry.version, registries.query(uuid)?) {
                if view.version_info(version).is_some_and(|info| info.yanked) {
                    return Err(ResolverError::YankedPinned {
                        uuid,
                        name: entry.name.clone(),
                        version: version.clone(),
                    }
                    .into());
                }
            }
        }

        let entry = env.manifest.entries.get_mut(&uuid).expect("validated above");
        entry.pinned = true;
        config.ui().print(Status::new("Pinning", entry.name.as_str()));
    }
    env.commit(config)
}

/// Clears the pinned flag and drops path/repo tracking, then re-resolves so
/// freed packages return to registry tracking.
pub fn free(
    config: &Config,
    env: &mut Environment,
    specs: Vec<PackageSpec>,
    opts: &OpOptions,
) -> Result<()> {
    if specs.is_empty() {
        bail!("`free` needs at least one package spec");
    }

    for uuid in target_uuids(env, &specs)? {
        let entry = env.manifest.entries.get_mut(&uuid).expect("validated above");
        config.ui().print(Status::new("Freeing", entry.name.as_str()));
        entry.pinned = false;
        if entry.is_tracking_path() || entry.is_tracking_repo() {
            entry.source = None;
        }
        let name = entry.name.clone();
        env.project.sources.remove(&name);
    }

    resolve_and_install(config, env, opts, &BTreeMap::new())
}
