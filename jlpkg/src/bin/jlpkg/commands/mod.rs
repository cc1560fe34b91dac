use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops::{Environment, PackageSpec};

use crate::args::{Args, Command};

mod activate;
mod add;
mod build;
mod develop;
mod free;
mod gc;
mod instantiate;
mod pin;
mod precompile;
mod remove;
mod resolve;
mod status;
mod update;

pub fn run(args: Args, config: &Config) -> Result<()> {
    let project = args.project.clone();
    match args.command {
        Command::Add { specs, preserve } => add::run(config, &project, specs, preserve),
        Command::Develop { specs } => develop::run(config, &project, specs),
        Command::Rm { specs, mode } => remove::run(config, &project, specs, mode),
        Command::Up {
            specs,
            level,
            preserve,
        } => update::run(config, &project, specs, level, preserve),
        Command::Pin { specs } => pin::run(config, &project, specs),
        Command::Free { specs } => free::run(config, &project, specs),
        Command::Instantiate => instantiate::run(config, &project),
        Command::Resolve { preserve } => resolve::run(config, &project, preserve),
        Command::Test => test::run(config, &project),
        Command::Build => build::run(config, &project),
        Command::Precompile => precompile::run(config, &project),
        Command::Gc { collect_delay, all } => gc::run(config, collect_delay, all),
        Command::Status => status::run(config, &project),
        Command::Activate { path } => activate::run(config, path),
    }
}

pub(crate) fn load_env(project: &Option<Utf8PathBuf>) -> Result<Environment> {
    match project {
        Some(path) => Environment::load(path.clone()),
        None => Environment::discover(),
    }
}

pub(crate) fn parse_specs(specs: Vec<String>) -> Result<Vec<PackageSpec>> {
    specs.iter().map(|s| s.parse()).collect()
}
