use std::collections::BTreeMap;

use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops::{self, OpOptions};
use jlpkg::resolver::PreservePolicy;

use super::load_env;

pub fn run(
    config: &Config,
    project: &Option<Utf8PathBuf>,
    preserve: PreservePolicy,
) -> Result<()> {
    let mut env = load_env(project)?;
    let opts = OpOptions {
        preserve,
        ..OpOptions::default()
    };
    ops::resolve_and_install(config, &mut env, &opts, &BTreeMap::new())
}
