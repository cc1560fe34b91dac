//! The installation pipeline: decide source, download, verify, unpack,
//! overlay artifacts, queue builds.
//!
//! Steps are parallel across distinct packages; builds run later, serially,
//! in an order consistent with resolved deps. Cancellation mid-install never
//! leaves a half-written `packages/<name>/<slug>` directory: all extraction
//! goes to temporary siblings renamed into place on success.

use std::env;

use anyhow::{bail, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

pub use download::Downloader;
pub use unpack::SymlinkMode;

use crate::core::source::{EntrySource, RepoLocation};
use crate::core::{PackageName, TreeHash, Uuid};
use crate::depot::Depot;
use crate::install::git::GitClones;
use crate::platform::PlatformSpec;
use crate::ui::{Status, Ui};
use crate::{
    BUILD_SCRIPT_PATH, COMPRESSION_ENGINE_ENV, DEFAULT_PKG_SERVER, DOWNLOAD_ENGINE_ENV,
    PKG_SERVER_ENV, SYMLINK_WORKAROUND_ENV,
};

pub mod artifacts;
pub mod download;
pub mod git;
pub mod unpack;
pub mod verify;

/// How many package installations run concurrently.
const CONCURRENCY: usize = 8;

#[derive(Debug)]
pub struct InstallOptions {
    pub platform: PlatformSpec,
    pub force: bool,
    pub offline: bool,
    pub pkg_server: String,
    pub symlink_mode: Option<SymlinkMode>,
}

impl InstallOptions {
    pub fn from_env(platform: PlatformSpec, offline: bool) -> Self {
        let pkg_server =
            env::var(PKG_SERVER_ENV).unwrap_or_else(|_| DEFAULT_PKG_SERVER.to_string());
        let symlink_mode = match env::var_os(SYMLINK_WORKAROUND_ENV) {
            Some(v) if v == "true" || v == "1" => Some(SymlinkMode::Copy),
            _ => None,
        };
        // External engine overrides are accepted for compatibility; the
        // built-in HTTP client and gzip codec serve both roles here.
        if let Ok(engine) = env::var(DOWNLOAD_ENGINE_ENV) {
            debug!("ignoring download engine override `{engine}`");
        }
        if let Ok(engine) = env::var(COMPRESSION_ENGINE_ENV) {
            debug!("ignoring compression engine override `{engine}`");
        }
        Self {
            platform,
            force: false,
            offline,
            pkg_server,
            symlink_mode,
        }
    }
}

/// One package the resolver selected for materialization.
#[derive(Clone, Debug)]
pub struct InstallUnit {
    pub uuid: Uuid,
    pub name: PackageName,
    pub source: EntrySource,
}

/// A build recipe found in an unpacked tree, to be run after the entire set
/// is materialized.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildJob {
    pub uuid: Uuid,
    pub name: PackageName,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Default)]
pub struct InstallReport {
    pub build_jobs: Vec<BuildJob>,
    /// Artifact directories installed or confirmed by this run; the operation
    /// layer records them in the usage log once the manifest commits.
    pub artifacts: Vec<Utf8PathBuf>,
}

pub struct Installer<'a> {
    depot: &'a Depot,
    ui: &'a Ui,
    downloader: Downloader,
    options: InstallOptions,
}

impl<'a> Installer<'a> {
    pub fn new(depot: &'a Depot, ui: &'a Ui, options: InstallOptions) -> Result<Self> {
        Ok(Self {
            depot,
            ui,
            downloader: Downloader::new(options.offline)?,
            options,
        })
    }

    /// Brings the depot into agreement with the given set of packages.
    #[tracing::instrument(level = "debug", skip_all, fields(units = units.len()))]
    pub async fn materialize(&self, units: Vec<InstallUnit>) -> Result<InstallReport> {
        let reports: Vec<InstallReport> = stream::iter(units)
            .map(|unit| self.install_unit(unit))
            .buffer_unordered(CONCURRENCY)
            .try_collect()
            .await?;

        let mut merged = InstallReport::default();
        for report in reports {
            merged.build_jobs.extend(report.build_jobs);
            merged.artifacts.extend(report.artifacts);
        }
        merged.artifacts.sort();
        merged.artifacts.dedup();
        Ok(merged)
    }

    async fn install_unit(&self, unit: InstallUnit) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        let tree_path = match &unit.source {
            EntrySource::Path(path) => {
                if !path.is_dir() {
                    bail!(
                        "path-tracked package {} points at missing directory `{path}`",
                        unit.name
                    );
                }
                Some(path.clone())
            }
            EntrySource::Tree(tree) => Some(self.install_tree(&unit, *tree).await?),
            EntrySource::Repo {
                location,
                tree_hash,
            } => Some(self.install_repo(&unit, location, *tree_hash)?),
        };

        if let Some(tree_path) = tree_path {
            self.overlay_artifacts(&tree_path, &mut report).await?;
            if tree_path.join(BUILD_SCRIPT_PATH).is_file() {
                report.build_jobs.push(BuildJob {
                    uuid: unit.uuid,
                    name: unit.name.clone(),
                    path: tree_path,
                });
            }
        }
        Ok(report)
    }

    /// Fetches a content-addressed source tarball from the package server and
    /// unpacks it into `packages/<name>/<slug>`.
    async fn install_tree(&self, unit: &InstallUnit, tree: TreeHash) -> Result<Utf8PathBuf> {
        let dest = self.depot.package_path(&unit.name, tree)?;
        if dest.is_dir() {
            debug!("{} tree {tree} already installed", unit.name);
            return Ok(dest);
        }

        self.ui.print(Status::new(
            "Installing",
            &format!("{} [{}]", unit.name, tree.slug(8)),
        ));

        let url = format!("{}/package/{}/{tree}", self.options.pkg_server, unit.uuid);
        let staging = tempfile::tempdir().context("failed to create download directory")?;
        let tarball = Utf8Path::from_path(staging.path())
            .context("staging path is not UTF-8")?
            .join(format!("{tree}.tar.gz"));

        let mode = self.symlink_mode(&dest)?;
        self.downloader
            .download(&url, &tarball, None, self.options.force)
            .await?;
        match unpack::unpack_package(&tarball, &dest, mode, tree) {
            Ok(()) => {}
            Err(first) if first.downcast_ref::<crate::core::HashError>().is_some() => {
                // A corrupt tarball gets one redownload from scratch; the
                // second failure surfaces.
                debug!("tree hash mismatch for {}; redownloading", unit.name);
                crate::internal::fsx::remove_file(&tarball)?;
                self.downloader.download(&url, &tarball, None, true).await?;
                unpack::unpack_package(&tarball, &dest, mode, tree).with_context(|| {
                    format!("tree {tree} of {} failed verification twice", unit.name)
                })?;
            }
            Err(err) => return Err(err),
        }
        Ok(dest)
    }

    /// Materializes a repo-tracked package from its clone.
    fn install_repo(
        &self,
        unit: &InstallUnit,
        location: &RepoLocation,
        tree_hash: Option<TreeHash>,
    ) -> Result<Utf8PathBuf> {
        if self.options.offline {
            bail!(
                "cannot fetch repo-tracked package {} in offline mode",
                unit.name
            );
        }
        let clones = GitClones::new(self.depot, self.ui);
        let tree = match tree_hash {
            Some(tree) => {
                clones.ensure_clone(&location.url)?;
                tree
            }
            None => clones.resolve_tree(location)?,
        };
        let dest = self.depot.package_path(&unit.name, tree)?;
        if dest.is_dir() {
            return Ok(dest);
        }
        self.ui.print(Status::new(
            "Checking",
            &format!("out {} [{}]", unit.name, tree.slug(8)),
        ));
        // Checkout lands in a temp sibling and is renamed into place, like
        // tarball extraction.
        let parent = dest.parent().expect("package path has a parent");
        crate::internal::fsx::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".jlpkg-checkout-")
            .tempdir_in(parent)
            .context("failed to create checkout staging")?;
        let staging_root = Utf8Path::from_path(staging.path())
            .context("staging path is not UTF-8")?
            .to_path_buf();
        clones.checkout_tree(&location.url, tree, &staging_root)?;
        crate::depot::write_tree_info(&staging_root, tree)?;
        match std::fs::rename(&staging_root, &dest) {
            Ok(()) => {
                std::mem::forget(staging);
                Ok(dest)
            }
            Err(_) if dest.is_dir() => Ok(dest),
            Err(err) => {
                Err(err).with_context(|| format!("failed to move checkout into `{dest}`"))
            }
        }
    }

    /// Downloads and unpacks every host-matching, non-lazy artifact
    /// referenced by the tree, into `artifacts/<tree-hash>/` shared across
    /// projects.
    async fn overlay_artifacts(
        &self,
        tree_path: &Utf8Path,
        report: &mut InstallReport,
    ) -> Result<()> {
        for file in artifacts::find_artifacts_files(tree_path) {
            let entries = artifacts::parse_artifacts(&crate::internal::fsx::read_to_string(&file)?)
                .with_context(|| format!("failed to parse `{file}`"))?;
            for entry in artifacts::select_for_host(&entries, &self.options.platform) {
                let dest = self.depot.artifact_path(entry.tree_hash);
                if dest.is_dir() {
                    report.artifacts.push(dest);
                    continue;
                }
                if entry.lazy {
                    continue;
                }
                self.install_artifact(entry, &dest).await?;
                report.artifacts.push(dest);
            }
        }
        Ok(())
    }

    async fn install_artifact(
        &self,
        entry: &artifacts::ArtifactEntry,
        dest: &Utf8Path,
    ) -> Result<()> {
        self.ui.print(Status::new(
            "Downloading",
            &format!("artifact {} [{}]", entry.name, entry.tree_hash.slug(8)),
        ));
        let staging = tempfile::tempdir().context("failed to create download directory")?;
        let tarball = Utf8Path::from_path(staging.path())
            .context("staging path is not UTF-8")?
            .join(format!("{}.tar.gz", entry.tree_hash));

        let mut last_err = None;
        let mut sources: Vec<(String, Option<crate::core::FileHash>)> = entry
            .downloads
            .iter()
            .map(|d| (d.url.clone(), d.sha256))
            .collect();
        if sources.is_empty() {
            // No explicit mirror: fall back to the package server.
            sources.push((
                format!("{}/artifact/{}", self.options.pkg_server, entry.tree_hash),
                None,
            ));
        }
        for (url, sha256) in sources {
            match self
                .downloader
                .download(&url, &tarball, sha256, self.options.force)
                .await
            {
                Ok(()) => {
                    let mode = self.symlink_mode(dest)?;
                    unpack::unpack_tarball(&tarball, dest, mode)?;
                    return Ok(());
                }
                Err(err) => {
                    debug!("artifact source `{url}` failed: {err:#}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.expect("at least one source was attempted"))
            .with_context(|| format!("failed to install artifact {}", entry.name))
    }

    fn symlink_mode(&self, dest: &Utf8Path) -> Result<SymlinkMode> {
        if let Some(mode) = self.options.symlink_mode {
            return Ok(mode);
        }
        let parent = dest.parent().expect("destination has a parent");
        crate::internal::fsx::create_dir_all(parent)?;
        Ok(unpack::probe_symlinks(parent))
    }
}

/// Orders build jobs topologically by resolved dependency edges, so builds
/// run after everything they depend on.
pub fn order_builds(
    jobs: Vec<BuildJob>,
    deps_of: impl Fn(Uuid) -> Vec<Uuid>,
) -> Vec<BuildJob> {
    let mut graph = petgraph::graphmap::DiGraphMap::<Uuid, ()>::new();
    for job in &jobs {
        graph.add_node(job.uuid);
        for dep in deps_of(job.uuid) {
            if jobs.iter().any(|j| j.uuid == dep) {
                graph.add_edge(dep, job.uuid, ());
            }
        }
    }
    // Dependency cycles are legal in this model; strongly connected
    // components are emitted in an arbitrary internal order.
    let order: Vec<Uuid> = match petgraph::algo::toposort(&graph, None) {
        Ok(order) => order,
        Err(_) => graph.nodes().collect(),
    };
    let mut sorted = Vec::with_capacity(jobs.len());
    for uuid in order {
        if let Some(job) = jobs.iter().find(|j| j.uuid == uuid) {
            sorted.push(job.clone());
        }
    }
    sorted
}

/// The seam to the external build-script runner.
pub trait BuildRunner {
    fn run(&self, job: &BuildJob) -> Result<()>;
}

/// Records build jobs without executing anything; script execution belongs to
/// the host-language tooling.
pub struct LoggingBuildRunner<'a> {
    pub ui: &'a Ui,
}

impl BuildRunner for LoggingBuildRunner<'_> {
    fn run(&self, job: &BuildJob) -> Result<()> {
        self.ui
            .print(Status::new("Building", &format!("{} at {}", job.name, job.path)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::{order_builds, BuildJob};
    use crate::core::{PackageName, Uuid};

    fn uuid(n: u8) -> Uuid {
        Uuid::parse(&format!("00000000-0000-0000-0000-0000000000{n:02x}")).unwrap()
    }

    fn job(name: &str, id: u8) -> BuildJob {
        BuildJob {
            uuid: uuid(id),
            name: PackageName::new(name),
            path: Utf8PathBuf::from(format!("/depot/packages/{name}/00000000")),
        }
    }

    #[test]
    fn builds_run_in_dependency_order() {
        let jobs = vec![job("App", 1), job("Lib", 2), job("Base", 3)];
        // App depends on Lib which depends on Base.
        let deps_of = |u: Uuid| -> Vec<Uuid> {
            if u == uuid(1) {
                vec![uuid(2)]
            } else if u == uuid(2) {
                vec![uuid(3)]
            } else {
                vec![]
            }
        };
        let ordered = order_builds(jobs, deps_of);
        let names: Vec<&str> = ordered.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["Base", "Lib", "App"]);
    }

    #[test]
    fn cyclic_builds_do_not_panic() {
        let jobs = vec![job("A", 1), job("B", 2)];
        let deps_of = |u: Uuid| -> Vec<Uuid> {
            if u == uuid(1) {
                vec![uuid(2)]
            } else {
                vec![uuid(1)]
            }
        };
        let ordered = order_builds(jobs, deps_of);
        assert_eq!(ordered.len(), 2);
    }
}
