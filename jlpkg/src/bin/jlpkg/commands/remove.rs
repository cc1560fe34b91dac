use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops::{self, DepMode, OpOptions};

use super::{load_env, parse_specs};

pub fn run(
    config: &Config,
    project: &Option<Utf8PathBuf>,
    specs: Vec<String>,
    mode: DepMode,
) -> Result<()> {
    let mut env = load_env(project)?;
    let opts = OpOptions {
        mode,
        ..OpOptions::default()
    };
    ops::remove(config, &mut env, parse_specs(specs)?, &opts)
}
