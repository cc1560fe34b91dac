use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops::{self, OpOptions};

use super::{load_env, parse_specs};

pub fn run(config: &Config, project: &Option<Utf8PathBuf>, specs: Vec<String>) -> Result<()> {
    let mut env = load_env(project)?;
    ops::free(config, &mut env, parse_specs(specs)?, &OpOptions::default())
}
