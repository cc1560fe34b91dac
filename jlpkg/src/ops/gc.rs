//! `gc`: collect orphaned installations depot-wide.

use anyhow::Result;
use chrono::Duration;

use crate::core::Config;
use crate::depot::gc::{self, GcReport, DEFAULT_COLLECT_DELAY_DAYS};

pub fn gc(config: &Config, collect_delay: Option<Duration>) -> Result<GcReport> {
    let delay = collect_delay.unwrap_or_else(|| Duration::days(DEFAULT_COLLECT_DELAY_DAYS));
    gc::gc(config.depot(), config.ui(), delay)
}
