//! The operation layer: pure transformations over a `(Project, Manifest)`
//! pair, guarded by a per-environment file lock and committed atomically.

use std::env;

use anyhow::{anyhow, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;

pub use add::{add, develop};
pub use build::build;
pub use gc::gc;
pub use instantiate::instantiate;
pub use pin::{free, pin};
pub use remove::remove;
pub use resolve::resolve_and_install;
pub use spec::PackageSpec;
pub use status::status;
pub use update::update;

use crate::core::{Config, Manifest, Project};
use crate::depot::UsageLog;
use crate::flock::{FileLockGuard, Filesystem};
use crate::internal::fsx;
use crate::platform::PlatformSpec;
use crate::resolver::{PreservePolicy, UpgradeLevel};
use crate::{MANIFEST_FILE_NAME, PROJECT_ENV, PROJECT_FILE_NAME};

pub mod add;
pub mod build;
pub mod gc;
pub mod instantiate;
pub mod pin;
pub mod remove;
pub mod resolve;
pub mod spec;
pub mod status;
pub mod update;

const ENV_LOCK_FILE: &str = ".jlpkg-env.lock";

/// Whether an operation reads its targets from the project, the manifest, or
/// both.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum DepMode {
    #[default]
    Project,
    Manifest,
    Combined,
}

/// The option bag every top-level operation accepts.
#[derive(Debug)]
pub struct OpOptions {
    pub preserve: PreservePolicy,
    pub level: UpgradeLevel,
    pub mode: DepMode,
    pub platform: PlatformSpec,
    pub update_registry: bool,
    pub verbose: bool,
    pub allow_autoprecompile: bool,
}

impl Default for OpOptions {
    fn default() -> Self {
        let allow_autoprecompile = env::var(crate::AUTOPRECOMPILE_ENV)
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        Self {
            preserve: PreservePolicy::default(),
            level: UpgradeLevel::default(),
            mode: DepMode::default(),
            platform: PlatformSpec::host(),
            update_registry: false,
            verbose: false,
            allow_autoprecompile,
        }
    }
}

/// A `(project, manifest)` pair at a filesystem location.
#[derive(Debug)]
pub struct Environment {
    root: Utf8PathBuf,
    pub project: Project,
    pub manifest: Manifest,
}

impl Environment {
    pub fn load(root: impl Into<Utf8PathBuf>) -> Result<Self> {
        let root = root.into();
        let project = Project::read(root.join(PROJECT_FILE_NAME))?;
        // The manifest validates its own invariants on read. Agreement with
        // the project is NOT required here: a freshly hand-edited project is
        // exactly what `resolve` exists to reconcile.
        let manifest = Manifest::read(root.join(MANIFEST_FILE_NAME))?;
        Ok(Self {
            root,
            project,
            manifest,
        })
    }

    /// The active environment: `$JLPKG_PROJECT`, or the closest ancestor of
    /// the working directory carrying a project file, or the working
    /// directory itself.
    pub fn discover() -> Result<Self> {
        if let Some(path) = env::var_os(PROJECT_ENV) {
            let path = Utf8PathBuf::from_path_buf(path.into())
                .map_err(|p| anyhow!("project path `{}` is not UTF-8 encoded", p.display()))?;
            return Self::load(path);
        }
        let cwd = Utf8PathBuf::from_path_buf(env::current_dir()?)
            .map_err(|p| anyhow!("working directory `{}` is not UTF-8 encoded", p.display()))?;
        let mut dir: &Utf8Path = &cwd;
        loop {
            if dir.join(PROJECT_FILE_NAME).is_file() {
                return Self::load(dir);
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => return Self::load(&cwd),
            }
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn project_path(&self) -> Utf8PathBuf {
        self.root.join(PROJECT_FILE_NAME)
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    /// Takes the per-environment lock; project/manifest writes within one
    /// environment are totally ordered by it.
    pub fn lock(&self, config: &Config) -> Result<FileLockGuard> {
        Filesystem::new(self.root.clone()).open_rw(ENV_LOCK_FILE, "environment", config.ui())
    }

    /// Writes the pair to sibling temp files with atomic renames, then
    /// appends the usage log entry. The manifest goes last: an earlier
    /// failure leaves the pre-operation manifest byte-for-byte intact.
    pub fn commit(&self, config: &Config) -> Result<()> {
        self.manifest.validate_against(&self.project)?;
        let rendered_project = self.project.render();
        if rendered_project.is_empty() && !self.project_path().exists() {
            // An empty project with nothing on disk stays that way.
        } else {
            fsx::write_atomic(self.project_path(), rendered_project)?;
        }
        self.manifest.write(self.manifest_path())?;
        UsageLog::manifest_usage(config.depot())?.append(&self.manifest_path())?;
        Ok(())
    }
}
