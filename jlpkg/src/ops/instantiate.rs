//! `instantiate`: bring the depot into agreement with the existing manifest
//! without re-resolving anything.

use anyhow::Result;

use crate::core::Config;
use crate::ops::resolve::install_manifest;
use crate::ops::{Environment, OpOptions};
use crate::ui::Status;

pub fn instantiate(config: &Config, env: &mut Environment, opts: &OpOptions) -> Result<()> {
    let _lock = env.lock(config)?;
    env.manifest.validate_against(&env.project)?;

    config
        .ui()
        .print(Status::new("Instantiating", env.root().as_str()));
    install_manifest(config, env, &env.manifest.clone(), opts)?;

    // The pair on disk is already what we instantiated; committing just
    // refreshes the usage log stamp.
    env.commit(config)
}
