//! `status`: render the environment's resolved state.

use anyhow::Result;

use crate::core::{Config, EntrySource};
use crate::ops::Environment;
use crate::ui::Status;

pub fn status(config: &Config, env: &Environment) -> Result<()> {
    let ui = config.ui();
    ui.print(Status::new("Status", env.project_path().as_str()));

    if env.manifest.entries.is_empty() {
        ui.print("  (empty environment)");
        return Ok(());
    }

    for (uuid, entry) in &env.manifest.entries {
        let direct = env.project.deps.values().any(|u| u == uuid);
        let marker = if direct { "" } else { "  " };
        let version = entry
            .version
            .as_ref()
            .map(|v| format!(" v{v}"))
            .unwrap_or_default();
        let annotation = match &entry.source {
            Some(EntrySource::Path(path)) => format!(" [dev at {path}]"),
            Some(EntrySource::Repo { location, .. }) => {
                format!(" [{}#{}]", location.url, location.rev)
            }
            Some(EntrySource::Tree(_)) => String::new(),
            None => " [stdlib]".to_string(),
        };
        let pin = if entry.pinned { " ⚲" } else { "" };
        ui.print(format!(
            "{marker}[{short}] {name}{version}{annotation}{pin}",
            short = &uuid.to_string()[..8],
            name = entry.name,
        ));
    }
    Ok(())
}
