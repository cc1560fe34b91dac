use std::env;

use anyhow::{Context, Result};
use semver::Version;
use tokio::runtime::Runtime;

use crate::depot::Depot;
use crate::platform::PlatformSpec;
use crate::ui::Ui;

pub const JULIA_VERSION_ENV: &str = "JLPKG_JULIA_VERSION";
const DEFAULT_JULIA_VERSION: &str = "1.10.0";

/// Process-wide context for operations.
///
/// Everything that would otherwise live in process globals is owned here and
/// passed by reference: the depot (with its registry cache), console output,
/// the async runtime the installer fans out on, and the host description.
#[derive(Debug)]
pub struct Config {
    depot: Depot,
    ui: Ui,
    runtime: Runtime,
    julia_version: Version,
    platform: PlatformSpec,
    offline: bool,
}

impl Config {
    pub fn init(depot: Depot, ui: Ui, offline: bool) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        let julia_version = match env::var(JULIA_VERSION_ENV) {
            Ok(v) => Version::parse(&v)
                .with_context(|| format!("invalid ${JULIA_VERSION_ENV} value `{v}`"))?,
            Err(_) => Version::parse(DEFAULT_JULIA_VERSION).unwrap(),
        };
        Ok(Self {
            depot,
            ui,
            runtime,
            julia_version,
            platform: PlatformSpec::host(),
            offline,
        })
    }

    pub fn depot(&self) -> &Depot {
        &self.depot
    }

    pub fn ui(&self) -> &Ui {
        &self.ui
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn julia_version(&self) -> &Version {
        &self.julia_version
    }

    pub fn set_julia_version(&mut self, version: Version) {
        self.julia_version = version;
    }

    pub fn platform(&self) -> &PlatformSpec {
        &self.platform
    }

    pub fn set_platform(&mut self, platform: PlatformSpec) {
        self.platform = platform;
    }

    pub fn offline(&self) -> bool {
        self.offline
    }
}
