//! `build` and `precompile`: drain the build-version queue for the current
//! environment.
//!
//! Script execution itself belongs to the host-language tooling; this
//! operation finds recipes among materialized trees and hands them to the
//! configured [`BuildRunner`] in topological order.

use anyhow::Result;

use crate::core::Config;
use crate::install::{order_builds, BuildJob, BuildRunner, LoggingBuildRunner};
use crate::ops::Environment;
use crate::BUILD_SCRIPT_PATH;

pub fn build(config: &Config, env: &Environment, runner: Option<&dyn BuildRunner>) -> Result<()> {
    let _lock = env.lock(config)?;

    let mut jobs = Vec::new();
    for (uuid, entry) in &env.manifest.entries {
        let tree_path = match &entry.source {
            Some(crate::core::EntrySource::Path(path)) => {
                let absolute = if path.is_absolute() {
                    path.clone()
                } else {
                    env.root().join(path)
                };
                Some(absolute)
            }
            Some(source) => source
                .tree_hash()
                .and_then(|tree| config.depot().find_package(&entry.name, tree)),
            None => None,
        };
        let Some(tree_path) = tree_path else {
            continue;
        };
        if tree_path.join(BUILD_SCRIPT_PATH).is_file() {
            jobs.push(BuildJob {
                uuid: *uuid,
                name: entry.name.clone(),
                path: tree_path,
            });
        }
    }

    let deps_of = |uuid: crate::core::Uuid| -> Vec<crate::core::Uuid> {
        env.manifest
            .entries
            .get(&uuid)
            .map(|e| e.deps.values().copied().collect())
            .unwrap_or_default()
    };

    let default_runner = LoggingBuildRunner { ui: config.ui() };
    let runner = runner.unwrap_or(&default_runner);
    for job in order_builds(jobs, deps_of) {
        runner.run(&job)?;
    }
    Ok(())
}
