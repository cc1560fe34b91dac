//! `add` and `develop`: merge new direct deps into the project and
//! re-resolve.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};
use camino::Utf8PathBuf;

use crate::core::{Config, PackageName, Project, SourceSpec, Uuid};
use crate::ops::resolve::resolve_and_install;
use crate::ops::{Environment, OpOptions, PackageSpec};
use crate::ui::Status;
use crate::PROJECT_FILE_NAME;

/// Merges `specs` into the project's direct deps (and `[sources]` where a
/// path or URL was given), then resolves and installs.
pub fn add(
    config: &Config,
    env: &mut Environment,
    specs: Vec<PackageSpec>,
    opts: &OpOptions,
) -> Result<()> {
    if specs.is_empty() {
        bail!("`add` needs at least one package spec");
    }
    for spec in &specs {
        stage_spec(config, env, spec)
            .with_context(|| format!("cannot add `{}`", spec.label()))?;
    }
    resolve_and_install(config, env, opts, &BTreeMap::new())
}

/// Like [`add`], but forces path-tracking: the spec must carry a path or a
/// clone URL.
pub fn develop(
    config: &Config,
    env: &mut Environment,
    specs: Vec<PackageSpec>,
    opts: &OpOptions,
) -> Result<()> {
    if specs.is_empty() {
        bail!("`develop` needs at least one package spec");
    }
    for spec in &specs {
        if spec.path.is_none() && spec.url.is_none() {
            bail!(
                "`develop` requires a path or repository URL for `{}`",
                spec.label()
            );
        }
        stage_spec(config, env, spec)
            .with_context(|| format!("cannot develop `{}`", spec.label()))?;
    }
    resolve_and_install(config, env, opts, &BTreeMap::new())
}

fn stage_spec(config: &Config, env: &mut Environment, spec: &PackageSpec) -> Result<()> {
    if let Some(path) = &spec.path {
        let (name, uuid) = identify_path(env, path)?;
        env.project.deps.insert(name.clone(), uuid);
        env.project
            .sources
            .insert(name.clone(), SourceSpec::Path { path: path.clone() });
        config
            .ui()
            .print(Status::new("Adding", &format!("{name} from {path}")));
        return Ok(());
    }

    if let Some(url) = &spec.url {
        let name = spec
            .name
            .clone()
            .or_else(|| name_from_url(url))
            .ok_or_else(|| anyhow!("cannot infer a package name from `{url}`"))?;
        env.project.sources.insert(
            name.clone(),
            SourceSpec::Repo {
                url: url.clone(),
                rev: spec.rev.clone(),
                subdir: spec.subdir.clone(),
            },
        );
        // The UUID becomes known once the repo's project file is read during
        // resolution; deps are keyed by it then.
        if let Some(uuid) = spec.uuid {
            env.project.deps.insert(name.clone(), uuid);
        } else {
            stage_repo_dep(config, env, &name, url, spec)?;
        }
        config
            .ui()
            .print(Status::new("Adding", &format!("{name} from {url}")));
        return Ok(());
    }

    let (name, uuid) = identify_registry(config, env, spec)?;
    env.project.deps.insert(name.clone(), uuid);
    if let Some(raw) = &spec.version_raw {
        env.project
            .compat
            .insert(name.clone(), crate::core::CompatEntry::parse(raw.clone())?);
    }
    config
        .ui()
        .print(Status::new("Adding", &format!("{name} [{uuid}]")));
    Ok(())
}

fn stage_repo_dep(
    config: &Config,
    env: &mut Environment,
    name: &PackageName,
    url: &str,
    spec: &PackageSpec,
) -> Result<()> {
    use crate::core::source::RepoLocation;
    use crate::install::git::GitClones;

    let location = RepoLocation {
        url: url.to_string(),
        rev: spec.rev.clone().unwrap_or_else(|| "HEAD".to_string()),
        subdir: spec.subdir.clone(),
    };
    let clones = GitClones::new(config.depot(), config.ui());
    let tree = clones.resolve_tree(&location)?;
    let staging = tempfile::tempdir().context("failed to create checkout staging")?;
    let staging_root = camino::Utf8Path::from_path(staging.path())
        .context("staging path is not UTF-8")?
        .to_path_buf();
    clones.checkout_tree(url, tree, &staging_root)?;
    let project = Project::read(staging_root.join(PROJECT_FILE_NAME))?;
    let uuid = project
        .uuid
        .ok_or_else(|| anyhow!("repository at `{url}` has no UUID in its project file"))?;
    env.project.deps.insert(name.clone(), uuid);
    Ok(())
}

/// Guesses a package name from a clone URL: the last path segment minus
/// `.git`/`.jl` suffixes.
fn name_from_url(url: &str) -> Option<PackageName> {
    let tail = url.trim_end_matches('/').rsplit('/').next()?;
    let tail = tail.strip_suffix(".git").unwrap_or(tail);
    let tail = tail.strip_suffix(".jl").unwrap_or(tail);
    PackageName::try_new(tail).ok()
}

fn identify_path(env: &Environment, path: &Utf8PathBuf) -> Result<(PackageName, Uuid)> {
    let absolute = if path.is_absolute() {
        path.clone()
    } else {
        env.root().join(path)
    };
    let project = Project::read(absolute.join(PROJECT_FILE_NAME))
        .with_context(|| format!("failed to read project at `{path}`"))?;
    let name = project
        .name
        .clone()
        .ok_or_else(|| anyhow!("project at `{path}` has no name"))?;
    let uuid = project
        .uuid
        .ok_or_else(|| anyhow!("project at `{path}` has no UUID"))?;
    Ok((name, uuid))
}

/// Resolves a registry spec to `(name, uuid)`, consulting registries for
/// whichever half is missing.
fn identify_registry(
    config: &Config,
    env: &Environment,
    spec: &PackageSpec,
) -> Result<(PackageName, Uuid)> {
    let registries = config.depot().registries()?;
    match (&spec.name, spec.uuid) {
        (Some(name), Some(uuid)) => Ok((name.clone(), uuid)),
        (None, Some(uuid)) => {
            let view = registries
                .query(uuid)?
                .ok_or_else(|| anyhow!("no registry carries [{uuid}]"))?;
            Ok((view.name, uuid))
        }
        (Some(name), None) => {
            // A name already known to the environment resolves to that UUID.
            if let Some(uuid) = env.project.deps.get(name).or_else(|| env.project.extras.get(name))
            {
                return Ok((name.clone(), *uuid));
            }
            if let Some(stdlib) = crate::core::stdlib::stdlib_uuid(name) {
                return Ok((name.clone(), stdlib));
            }
            let uuids = registries.uuids_named(name);
            match uuids.as_slice() {
                [uuid] => Ok((name.clone(), *uuid)),
                [] => bail!("no registry carries a package named `{name}`"),
                _ => bail!(
                    "package name `{name}` is ambiguous across registries; \
                     disambiguate with `{name}=<uuid>`"
                ),
            }
        }
        (None, None) => bail!("package spec names neither a package nor a UUID"),
    }
}
