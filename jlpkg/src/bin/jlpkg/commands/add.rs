use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops::{self, OpOptions};
use jlpkg::resolver::PreservePolicy;

use super::{load_env, parse_specs};

pub fn run(
    config: &Config,
    project: &Option<Utf8PathBuf>,
    specs: Vec<String>,
    preserve: PreservePolicy,
) -> Result<()> {
    let mut env = load_env(project)?;
    let opts = OpOptions {
        preserve,
        ..OpOptions::default()
    };
    ops::add(config, &mut env, parse_specs(specs)?, &opts)
}
