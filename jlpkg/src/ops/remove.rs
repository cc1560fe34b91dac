//! `rm`: drop packages from the project or directly from the manifest, then
//! prune whatever became unreachable.

use anyhow::{bail, Context, Result};

use crate::core::{Config, Uuid};
use crate::ops::{DepMode, Environment, OpOptions, PackageSpec};
use crate::ui::Status;

pub fn remove(
    config: &Config,
    env: &mut Environment,
    specs: Vec<PackageSpec>,
    opts: &OpOptions,
) -> Result<()> {
    if specs.is_empty() {
        bail!("`rm` needs at least one package spec");
    }
    let _lock = env.lock(config)?;

    match opts.mode {
        DepMode::Project | DepMode::Combined => remove_from_project(config, env, &specs)?,
        DepMode::Manifest => remove_from_manifest(config, env, &specs)?,
    }

    let roots: Vec<Uuid> = env
        .project
        .root_uuids()
        .into_iter()
        .map(|(_, uuid)| uuid)
        .collect();
    env.manifest.prune(roots);
    env.commit(config)
}

fn remove_from_project(
    config: &Config,
    env: &mut Environment,
    specs: &[PackageSpec],
) -> Result<()> {
    for spec in specs {
        let name = match (&spec.name, spec.uuid) {
            (Some(name), _) => name.clone(),
            (None, Some(uuid)) => env
                .project
                .deps
                .iter()
                .find(|(_, u)| **u == uuid)
                .map(|(n, _)| n.clone())
                .with_context(|| format!("[{uuid}] is not a direct dependency"))?,
            (None, None) => bail!("`rm` spec names neither a package nor a UUID"),
        };
        if env.project.deps.remove(&name).is_none() {
            bail!("`{name}` is not a direct dependency of the project");
        }
        env.project.compat.remove(&name);
        env.project.sources.remove(&name);
        for names in env.project.targets.values_mut() {
            names.retain(|n| *n != name);
        }
        config.ui().print(Status::new("Removing", name.as_str()));
    }
    Ok(())
}

/// Manifest mode drops the named entries *and* every entry that transitively
/// depends on them; the project is left untouched.
fn remove_from_manifest(
    config: &Config,
    env: &mut Environment,
    specs: &[PackageSpec],
) -> Result<()> {
    let mut doomed: Vec<Uuid> = Vec::new();
    for spec in specs {
        let uuid = match (spec.uuid, &spec.name) {
            (Some(uuid), _) => uuid,
            (None, Some(name)) => match env.manifest.find_by_name(name)? {
                Some((uuid, _)) => uuid,
                None => bail!("`{name}` is not in the manifest"),
            },
            (None, None) => bail!("`rm` spec names neither a package nor a UUID"),
        };
        doomed.push(uuid);
    }

    // Reverse closure: removing a package takes its dependents with it.
    loop {
        let before = doomed.len();
        for (uuid, entry) in &env.manifest.entries {
            if doomed.contains(uuid) {
                continue;
            }
            if entry.deps.values().any(|dep| doomed.contains(dep)) {
                doomed.push(*uuid);
            }
        }
        if doomed.len() == before {
            break;
        }
    }

    for uuid in &doomed {
        if let Some(entry) = env.manifest.entries.remove(uuid) {
            config.ui().print(Status::new("Removing", entry.name.as_str()));
            // A direct dep removed from the manifest must leave the project
            // too, or the environment would fail validation.
            let name = entry.name;
            if env.project.deps.get(&name) == Some(uuid) {
                env.project.deps.remove(&name);
                env.project.compat.remove(&name);
                env.project.sources.remove(&name);
            }
        }
    }
    Ok(())
}
