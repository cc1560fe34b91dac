//! The shared resolve → install → commit pipeline behind every mutating
//! operation.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context as _, Result};
use camino::Utf8PathBuf;
use tracing::debug;

use crate::core::source::{EntrySource, RepoLocation};
use crate::core::{stdlib, Config, Manifest, PackageName, Project, SourceSpec, Uuid, VersionSpec};
use crate::depot::UsageLog;
use crate::install::git::GitClones;
use crate::install::{
    order_builds, BuildRunner, InstallOptions, InstallUnit, Installer, LoggingBuildRunner,
};
use crate::ops::{Environment, OpOptions};
use crate::resolver::{self, FixedPackage, Resolution, ResolveRequest};
use crate::ui::Status;
use crate::PROJECT_FILE_NAME;

/// Everything `collect_inputs` gathers from the environment.
pub(crate) struct ResolveInputs {
    pub requirements: BTreeMap<Uuid, (PackageName, VersionSpec)>,
    pub fixed: BTreeMap<Uuid, FixedPackage>,
    /// Source identities for fixed packages: path- and repo-tracking entries
    /// keep these instead of registry tree hashes.
    pub overrides: BTreeMap<Uuid, EntrySource>,
    /// Packages named by `[sources]`: explicit roots that survive pruning
    /// even when nothing else reaches them.
    pub source_roots: Vec<Uuid>,
}

/// Gathers requirements and fixed entries from the staged project and the
/// current manifest: pinned entries, path-tracked and repo-tracked entries,
/// and `[sources]` overrides.
pub(crate) fn collect_inputs(config: &Config, env: &Environment) -> Result<ResolveInputs> {
    let mut fixed: BTreeMap<Uuid, FixedPackage> = BTreeMap::new();
    let mut overrides: BTreeMap<Uuid, EntrySource> = BTreeMap::new();
    let mut source_roots: Vec<Uuid> = Vec::new();

    // Sources overrides win over whatever the manifest recorded.
    for (name, source) in &env.project.sources {
        let uuid = env
            .project
            .deps
            .get(name)
            .or_else(|| env.project.extras.get(name))
            .copied()
            .or_else(|| {
                env.manifest
                    .entries_named(name)
                    .map(|(uuid, _)| *uuid)
                    .next()
            });
        match source {
            SourceSpec::Path { path } => {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    env.root().join(path)
                };
                let (found_uuid, package) = fixed_from_path(name, &absolute)?;
                if let Some(uuid) = uuid {
                    if uuid != found_uuid {
                        bail!(
                            "source override for `{name}` points at a project with \
                             UUID {found_uuid}, but the environment records {uuid}"
                        );
                    }
                }
                overrides.insert(found_uuid, EntrySource::Path(path.clone()));
                fixed.insert(found_uuid, package);
                source_roots.push(found_uuid);
            }
            SourceSpec::Repo { url, rev, subdir } => {
                let location = RepoLocation {
                    url: url.clone(),
                    rev: rev.clone().unwrap_or_else(|| "HEAD".to_string()),
                    subdir: subdir.clone(),
                };
                let (found_uuid, package, tree) = fixed_from_repo(config, name, &location)?;
                overrides.insert(
                    found_uuid,
                    EntrySource::Repo {
                        location,
                        tree_hash: Some(tree),
                    },
                );
                fixed.insert(found_uuid, package);
                source_roots.push(found_uuid);
            }
        }
    }

    for (uuid, entry) in &env.manifest.entries {
        if fixed.contains_key(uuid) || stdlib::is_stdlib(*uuid) {
            continue;
        }
        let keep = entry.pinned || entry.is_tracking_path() || entry.is_tracking_repo();
        if !keep {
            continue;
        }
        match &entry.source {
            Some(EntrySource::Path(path)) => {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    env.root().join(path)
                };
                let (found_uuid, package) = fixed_from_path(&entry.name, &absolute)?;
                if found_uuid != *uuid {
                    bail!(
                        "path-tracked package `{}` changed identity: manifest has \
                         {uuid}, project file at `{path}` has {found_uuid}",
                        entry.name
                    );
                }
                overrides.insert(*uuid, EntrySource::Path(path.clone()));
                fixed.insert(*uuid, package);
            }
            source => {
                if let Some(source) = source {
                    overrides.insert(*uuid, source.clone());
                }
                fixed.insert(
                    *uuid,
                    FixedPackage {
                        name: entry.name.clone(),
                        version: entry.version.clone(),
                        deps: entry.deps.clone(),
                        compat: BTreeMap::new(),
                    },
                );
            }
        }
    }

    let mut requirements = BTreeMap::new();
    for (name, uuid) in env.project.root_uuids() {
        if fixed.contains_key(&uuid) {
            continue;
        }
        let spec = env.project.compat_spec(&name);
        requirements.insert(uuid, (name, spec));
    }

    Ok(ResolveInputs {
        requirements,
        fixed,
        overrides,
        source_roots,
    })
}

/// Reads the project file of a path-tracked package: its declared deps come
/// from there, not from any registry.
fn fixed_from_path(name: &PackageName, path: &Utf8PathBuf) -> Result<(Uuid, FixedPackage)> {
    let project_path = path.join(PROJECT_FILE_NAME);
    let project = Project::read(&project_path)
        .with_context(|| format!("failed to read project of path-tracked `{name}`"))?;
    fixed_from_project(name, &project)
        .with_context(|| format!("invalid project file at `{project_path}`"))
}

fn fixed_from_project(name: &PackageName, project: &Project) -> Result<(Uuid, FixedPackage)> {
    let uuid = project
        .uuid
        .ok_or_else(|| anyhow!("tracked package `{name}` has no UUID in its project file"))?;
    if let Some(project_name) = &project.name {
        if project_name != name {
            bail!("tracked package is named `{project_name}`, not `{name}`");
        }
    }
    let compat = project
        .compat
        .iter()
        .map(|(n, c)| (n.clone(), c.spec.clone()))
        .collect();
    Ok((
        uuid,
        FixedPackage {
            name: name.clone(),
            version: project.version.clone(),
            deps: project.deps.clone(),
            compat,
        },
    ))
}

/// Clones (or fetches) a repo source and reads its project file at the
/// requested revision.
fn fixed_from_repo(
    config: &Config,
    name: &PackageName,
    location: &RepoLocation,
) -> Result<(Uuid, FixedPackage, crate::core::TreeHash)> {
    let clones = GitClones::new(config.depot(), config.ui());
    let tree = clones.resolve_tree(location)?;
    let checkout = config.depot().package_path(name, tree)?;
    if !checkout.is_dir() {
        let staging = tempfile::tempdir().context("failed to create checkout staging")?;
        let staging_root = camino::Utf8Path::from_path(staging.path())
            .context("staging path is not UTF-8")?
            .to_path_buf();
        clones.checkout_tree(&location.url, tree, &staging_root)?;
        let project = Project::read(staging_root.join(PROJECT_FILE_NAME))?;
        let (uuid, package) = fixed_from_project(name, &project)?;
        return Ok((uuid, package, tree));
    }
    let project = Project::read(checkout.join(PROJECT_FILE_NAME))?;
    let (uuid, package) = fixed_from_project(name, &project)?;
    Ok((uuid, package, tree))
}

/// Builds the next manifest from resolver output.
///
/// Fixed entries keep their current source identity (and `pinned` flag);
/// registry entries are re-addressed by the chosen version's tree hash.
/// Extensions recorded for a surviving UUID are carried over.
pub(crate) fn build_manifest(
    previous: &Manifest,
    resolution: &Resolution,
    julia_version: semver::Version,
    overrides: &BTreeMap<Uuid, EntrySource>,
) -> Result<Manifest> {
    let mut manifest = Manifest {
        julia_version: Some(julia_version),
        ..Manifest::default()
    };
    for (uuid, package) in &resolution.packages {
        let old = previous.entries.get(uuid);
        let source = if let Some(source) = overrides.get(uuid) {
            Some(source.clone())
        } else if package.fixed {
            old.and_then(|e| e.source.clone())
        } else {
            let tree = package.tree_hash.ok_or_else(|| {
                anyhow!(
                    "resolved {} [{uuid}] v{:?} has no tree hash",
                    package.name,
                    package.version
                )
            })?;
            Some(EntrySource::Tree(tree))
        };
        manifest.entries.insert(
            *uuid,
            crate::core::ManifestEntry {
                name: package.name.clone(),
                version: package.version.clone(),
                source,
                pinned: old.is_some_and(|e| e.pinned),
                deps: package.deps.clone(),
                extensions: old.map(|e| e.extensions.clone()).unwrap_or_default(),
            },
        );
    }
    Ok(manifest)
}

/// Resolves the environment, materializes anything missing, and commits the
/// new pair. This is the body of `add`, `up`, `free`, `develop` and the
/// standalone `resolve` operation.
pub fn resolve_and_install(
    config: &Config,
    env: &mut Environment,
    opts: &OpOptions,
    ceilings: &BTreeMap<Uuid, VersionSpec>,
) -> Result<()> {
    let _lock = env.lock(config)?;

    if opts.update_registry {
        // Registry refresh over the network is the front-end's concern; the
        // flag is accepted and recorded for it.
        debug!("registry update requested");
    }

    config.ui().print(Status::new("Resolving", "package versions"));
    let registries = config.depot().registries()?;
    let mut inputs = collect_inputs(config, env)?;
    for (uuid, ceiling) in ceilings {
        if let Some((_, spec)) = inputs.requirements.get_mut(uuid) {
            *spec = spec.intersect(ceiling);
        }
    }

    let depot = config.depot();
    let installed = |name: &PackageName, hash: crate::core::TreeHash| {
        depot.is_materialized(name, hash)
    };
    let previous: BTreeMap<Uuid, semver::Version> = env
        .manifest
        .entries
        .iter()
        .filter_map(|(uuid, e)| e.version.clone().map(|v| (*uuid, v)))
        .collect();

    let resolution = resolver::resolve(&ResolveRequest {
        registries: &registries,
        requirements: inputs.requirements.clone(),
        fixed: inputs.fixed.clone(),
        policy: opts.preserve,
        previous,
        julia_version: config.julia_version().clone(),
        installed: Some(&installed),
    })?;

    let mut manifest = build_manifest(
        &env.manifest,
        &resolution,
        config.julia_version().clone(),
        &inputs.overrides,
    )?;

    // Keep only what the project (and its explicitly named sources) can
    // still reach.
    let roots: Vec<Uuid> = env
        .project
        .root_uuids()
        .into_iter()
        .map(|(_, uuid)| uuid)
        .chain(inputs.source_roots.iter().copied())
        .collect();
    manifest.prune(roots);

    install_manifest(config, env, &manifest, opts)?;

    env.manifest = manifest;
    env.commit(config)?;
    Ok(())
}

/// Materializes every entry of a manifest and logs artifact usage.
pub(crate) fn install_manifest(
    config: &Config,
    env: &Environment,
    manifest: &Manifest,
    opts: &OpOptions,
) -> Result<()> {
    let mut units = Vec::new();
    for (uuid, entry) in &manifest.entries {
        let Some(source) = &entry.source else {
            continue;
        };
        let source = match source {
            EntrySource::Path(path) if !path.is_absolute() => {
                EntrySource::Path(env.root().join(path))
            }
            other => other.clone(),
        };
        units.push(InstallUnit {
            uuid: *uuid,
            name: entry.name.clone(),
            source,
        });
    }

    let installer = Installer::new(
        config.depot(),
        config.ui(),
        InstallOptions::from_env(*config.platform(), config.offline()),
    )?;
    let report = config.runtime().block_on(installer.materialize(units))?;

    let artifact_log = UsageLog::artifact_usage(config.depot())?;
    for artifact in &report.artifacts {
        artifact_log.append(artifact)?;
    }

    if opts.allow_autoprecompile && !report.build_jobs.is_empty() {
        let deps_of = |uuid: Uuid| -> Vec<Uuid> {
            manifest
                .entries
                .get(&uuid)
                .map(|e| e.deps.values().copied().collect())
                .unwrap_or_default()
        };
        let runner = LoggingBuildRunner { ui: config.ui() };
        for job in order_builds(report.build_jobs, deps_of) {
            runner.run(&job)?;
        }
    }
    Ok(())
}
