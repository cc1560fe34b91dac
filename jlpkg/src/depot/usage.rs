//! Usage logs: append-only records of which files an operation touched.
//!
//! Each successful environment operation appends one line; a line is a
//! complete TOML fragment of the shape `"<path>" = [{time = "<RFC3339>"}]`,
//! so concurrent writers interleave at line granularity. GC coalesces the
//! file down to the latest timestamp per referenced path.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};
use toml::value::{Table, Value};

use crate::depot::Depot;
use crate::internal::fsx;

pub const MANIFEST_USAGE: &str = "manifest_usage.toml";
pub const ARTIFACT_USAGE: &str = "artifact_usage.toml";
pub const SCRATCH_USAGE: &str = "scratch_usage.toml";
pub const ORPHANED: &str = "orphaned.toml";

#[derive(Debug)]
pub struct UsageLog {
    path: Utf8PathBuf,
}

impl UsageLog {
    pub fn manifest_usage(depot: &Depot) -> Result<Self> {
        Self::open(depot, MANIFEST_USAGE)
    }

    pub fn artifact_usage(depot: &Depot) -> Result<Self> {
        Self::open(depot, ARTIFACT_USAGE)
    }

    pub fn scratch_usage(depot: &Depot) -> Result<Self> {
        Self::open(depot, SCRATCH_USAGE)
    }

    fn open(depot: &Depot, name: &str) -> Result<Self> {
        let dir = depot.logs_dir();
        Ok(Self {
            path: dir.path_existent()?.join(name),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Appends one usage record with the current timestamp.
    pub fn append(&self, used: &Utf8Path) -> Result<()> {
        self.append_at(used, Utc::now())
    }

    pub fn append_at(&self, used: &Utf8Path, time: DateTime<Utc>) -> Result<()> {
        let stamp = time.to_rfc3339_opts(SecondsFormat::Secs, true);
        let line = format!("{} = [{{time = \"{stamp}\"}}]", toml_key(used.as_str()));
        fsx::append_line(&self.path, &line)
    }

    /// Reads every record, tolerating the duplicate keys that append-only
    /// writing produces: each line is parsed as its own document.
    pub fn read(&self) -> Result<BTreeMap<Utf8PathBuf, Vec<DateTime<Utc>>>> {
        let mut out: BTreeMap<Utf8PathBuf, Vec<DateTime<Utc>>> = BTreeMap::new();
        if !self.path.is_file() {
            return Ok(out);
        }
        let content = fsx::read_to_string(&self.path)?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let table: Table = toml::from_str(line)
                .with_context(|| format!("malformed usage log line in `{}`", self.path))?;
            for (key, value) in table {
                let times = out.entry(Utf8PathBuf::from(key)).or_default();
                collect_times(&value, times);
            }
        }
        Ok(out)
    }

    /// Rewrites the log with one latest-timestamp entry per path, dropping
    /// entries whose referenced file no longer exists. Returns what was kept.
    pub fn coalesce(&self) -> Result<BTreeMap<Utf8PathBuf, DateTime<Utc>>> {
        let mut latest: BTreeMap<Utf8PathBuf, DateTime<Utc>> = BTreeMap::new();
        for (path, times) in self.read()? {
            if !path.exists() {
                continue;
            }
            if let Some(max) = times.into_iter().max() {
                latest.insert(path, max);
            }
        }
        let mut content = String::new();
        for (path, time) in &latest {
            let stamp = time.to_rfc3339_opts(SecondsFormat::Secs, true);
            content.push_str(&format!(
                "{} = [{{time = \"{stamp}\"}}]\n",
                toml_key(path.as_str())
            ));
        }
        fsx::write_atomic(&self.path, content)?;
        Ok(latest)
    }
}

fn collect_times(value: &Value, out: &mut Vec<DateTime<Utc>>) {
    match value {
        Value::Array(entries) => {
            for entry in entries {
                collect_times(entry, out);
            }
        }
        Value::Table(table) => {
            if let Some(time) = table.get("time") {
                match time {
                    Value::String(s) => {
                        if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                            out.push(parsed.with_timezone(&Utc));
                        }
                    }
                    Value::Datetime(dt) => {
                        if let Ok(parsed) = DateTime::parse_from_rfc3339(&dt.to_string()) {
                            out.push(parsed.with_timezone(&Utc));
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

fn toml_key(path: &str) -> String {
    format!("{path:?}")
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use chrono::{Duration, Utc};

    use super::UsageLog;
    use crate::depot::Depot;
    use crate::internal::fsx;

    fn depot(t: &tempfile::TempDir) -> Depot {
        Depot::new(Utf8PathBuf::from_path_buf(t.path().to_path_buf()).unwrap())
    }

    #[test]
    fn append_then_read() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let log = UsageLog::manifest_usage(&depot).unwrap();
        let used = depot.root().join("Manifest.toml");
        log.append(&used).unwrap();
        log.append(&used).unwrap();

        let records = log.read().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[&used].len(), 2);
    }

    #[test]
    fn coalesce_keeps_latest_and_drops_missing() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let log = UsageLog::manifest_usage(&depot).unwrap();

        let extant = depot.root().join("Manifest.toml");
        fsx::write(&extant, "").unwrap();
        let missing = depot.root().join("Gone.toml");

        let earlier = Utc::now() - Duration::hours(2);
        let later = Utc::now() - Duration::hours(1);
        log.append_at(&extant, earlier).unwrap();
        log.append_at(&extant, later).unwrap();
        log.append_at(&missing, later).unwrap();

        let latest = log.coalesce().unwrap();
        assert_eq!(latest.len(), 1);
        let kept = latest[&extant];
        assert!((kept - later).num_seconds().abs() <= 1);

        // The rewritten log parses as a regular single-entry log.
        let records = log.read().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[&extant].len(), 1);
    }
}
