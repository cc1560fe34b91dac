use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops::{self, OpOptions};

use super::load_env;

pub fn run(config: &Config, project: &Option<Utf8PathBuf>) -> Result<()> {
    let mut env = load_env(project)?;
    ops::instantiate(config, &mut env, &OpOptions::default())
}
