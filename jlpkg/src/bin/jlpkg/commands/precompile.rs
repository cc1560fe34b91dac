use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops;

use super::load_env;

/// Precompilation orchestration is delegated to the host tooling; draining
/// the build queue is the part owned here.
pub fn run(config: &Config, project: &Option<Utf8PathBuf>) -> Result<()> {
    let env = load_env(project)?;
    ops::build(config, &env, None)
}
