use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops::{self, OpOptions};
use jlpkg::resolver::{PreservePolicy, UpgradeLevel};

use super::{load_env, parse_specs};

pub fn run(
    config: &Config,
    project: &Option<Utf8PathBuf>,
    specs: Vec<String>,
    level: UpgradeLevel,
    preserve: PreservePolicy,
) -> Result<()> {
    let mut env = load_env(project)?;
    let opts = OpOptions {
        level,
        preserve,
        ..OpOptions::default()
    };
    ops::update(config, &mut env, parse_specs(specs)?, &opts)
}
