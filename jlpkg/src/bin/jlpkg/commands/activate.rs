use anyhow::Result;
use camino::Utf8PathBuf;

use jlpkg::core::Config;
use jlpkg::ops::Environment;
use jlpkg::ui::Status;

/// Reports which environment a directory activates; the caller exports
/// `JLPKG_PROJECT` to make it stick.
pub fn run(config: &Config, path: Option<Utf8PathBuf>) -> Result<()> {
    let env = match path {
        Some(path) => Environment::load(path)?,
        None => Environment::discover()?,
    };
    config
        .ui()
        .print(Status::new("Activating", env.root().as_str()));
    Ok(())
}
