use anyhow::Result;
use chrono::Duration;

use jlpkg::core::Config;
use jlpkg::ops;
use jlpkg::ui::Status;

pub fn run(config: &Config, collect_delay: Option<i64>, all: bool) -> Result<()> {
    let delay = if all {
        Some(Duration::zero())
    } else {
        collect_delay.map(Duration::days)
    };
    let report = ops::gc(config, delay)?;
    config.ui().print(Status::new(
        "Collected",
        &format!(
            "{} deleted, {} awaiting their delay",
            report.deleted.len(),
            report.orphaned.len()
        ),
    ));
    Ok(())
}
