use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops;

use super::load_env;

pub fn run(config: &Config, project: &Option<Utf8PathBuf>) -> Result<()> {
    let env = load_env(project)?;
    ops::status(config, &env)
}
