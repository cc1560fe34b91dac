//! Garbage collection of orphaned installations.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use toml::value::{Table, Value};
use tracing::{debug, warn};

use crate::core::{EntrySource, Manifest};
use crate::depot::usage::{self, UsageLog};
use crate::depot::Depot;
use crate::install::artifacts::collect_artifact_hashes;
use crate::internal::fsx;
use crate::ui::{Status, Ui};

/// The default grace period between noticing an orphan and deleting it.
pub const DEFAULT_COLLECT_DELAY_DAYS: i64 = 7;

#[derive(Debug, Default)]
pub struct GcReport {
    /// Paths newly or still recorded as orphaned, awaiting their delay.
    pub orphaned: Vec<Utf8PathBuf>,
    /// Paths deleted by this run.
    pub deleted: Vec<Utf8PathBuf>,
}

/// Runs the collector: coalesce usage logs, mark reachable trees, record
/// unreachable ones, and delete those orphaned for longer than
/// `collect_delay`.
#[tracing::instrument(level = "debug", skip(depot, ui))]
pub fn gc(depot: &Depot, ui: &Ui, collect_delay: Duration) -> Result<GcReport> {
    let gc_lock = depot.gc_lock();
    let _guard = gc_lock.acquire(ui)?;

    let manifests = UsageLog::manifest_usage(depot)?.coalesce()?;
    UsageLog::artifact_usage(depot)?.coalesce()?;
    UsageLog::scratch_usage(depot)?.coalesce()?;

    let mut reachable: BTreeSet<Utf8PathBuf> = BTreeSet::new();
    for manifest_path in manifests.keys() {
        let manifest = match Manifest::read(manifest_path) {
            Ok(manifest) => manifest,
            Err(err) => {
                // GC runs concurrently with operations in other environments;
                // a manifest mid-rewrite is skipped, not fatal.
                warn!("skipping unreadable manifest `{manifest_path}`: {err:#}");
                continue;
            }
        };
        for entry in manifest.entries.values() {
            if let Some(EntrySource::Repo { location, .. }) = &entry.source {
                reachable.insert(depot.clone_path(&location.url));
            }
            let Some(tree) = entry.tree_hash() else {
                continue;
            };
            if let Some(path) = depot.find_package(&entry.name, tree) {
                for artifact in collect_artifact_hashes(&path).unwrap_or_default() {
                    reachable.insert(depot.artifact_path(artifact));
                }
                reachable.insert(path);
            }
        }
    }

    let mut existing: BTreeSet<Utf8PathBuf> = BTreeSet::new();
    for name_dir in list_dir(depot.packages_dir().path_unchecked()) {
        existing.extend(list_dir(&name_dir));
    }
    existing.extend(list_dir(depot.artifacts_dir().path_unchecked()));
    existing.extend(list_dir(depot.clones_dir().path_unchecked()));

    let now = Utc::now();
    let previously_orphaned = read_orphans(depot)?;
    let mut report = GcReport::default();
    let mut ledger: Vec<(Utf8PathBuf, DateTime<Utc>)> = Vec::new();

    for path in existing.difference(&reachable) {
        let first_seen = previously_orphaned
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, t)| *t)
            .unwrap_or(now);
        if now - first_seen >= collect_delay {
            debug!("deleting orphan `{path}`");
            if path.is_dir() {
                fsx::remove_dir_all(path)?;
            } else if path.is_file() {
                fsx::remove_file(path)?;
            }
            report.deleted.push(path.clone());
        } else {
            ledger.push((path.clone(), first_seen));
            report.orphaned.push(path.clone());
        }
    }
    write_orphans(depot, &ledger)?;

    sweep_empty_dirs(depot.packages_dir().path_unchecked())?;
    sweep_empty_dirs(depot.scratchspaces_dir().path_unchecked())?;

    if !report.deleted.is_empty() {
        ui.print(Status::new(
            "Deleted",
            &format!("{} orphaned installation(s)", report.deleted.len()),
        ));
    }
    Ok(report)
}

fn list_dir(path: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = path.read_dir_utf8() else {
        return out;
    };
    for entry in entries.flatten() {
        out.push(entry.path().to_path_buf());
    }
    out
}

fn sweep_empty_dirs(root: &Utf8Path) -> Result<()> {
    for dir in list_dir(root) {
        if dir.is_dir() && list_dir(&dir).is_empty() {
            fsx::remove_dir_all(&dir)?;
        }
    }
    Ok(())
}

fn orphans_path(depot: &Depot) -> Result<Utf8PathBuf> {
    Ok(depot.logs_dir().path_existent()?.join(usage::ORPHANED))
}

fn read_orphans(depot: &Depot) -> Result<Vec<(Utf8PathBuf, DateTime<Utc>)>> {
    let path = orphans_path(depot)?;
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = fsx::read_to_string(&path)?;
    let table: Table = toml::from_str(&content)
        .with_context(|| format!("malformed orphan ledger at `{path}`"))?;
    let mut out = Vec::with_capacity(table.len());
    for (key, value) in table {
        let Some(stamp) = value.as_str() else {
            continue;
        };
        if let Ok(time) = DateTime::parse_from_rfc3339(stamp) {
            out.push((Utf8PathBuf::from(key), time.with_timezone(&Utc)));
        }
    }
    Ok(out)
}

fn write_orphans(depot: &Depot, ledger: &[(Utf8PathBuf, DateTime<Utc>)]) -> Result<()> {
    let path = orphans_path(depot)?;
    let mut table = Table::new();
    for (orphan, time) in ledger {
        table.insert(
            orphan.to_string(),
            Value::String(time.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
    }
    fsx::write_atomic(&path, toml::to_string(&Value::Table(table))?)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use chrono::Duration;
    use semver::Version;

    use super::gc;
    use crate::core::{EntrySource, Manifest, ManifestEntry, PackageName, TreeHash, Uuid};
    use crate::depot::usage::UsageLog;
    use crate::depot::{write_tree_info, Depot};
    use crate::internal::fsx;
    use crate::ui::Ui;

    fn depot(t: &tempfile::TempDir) -> Depot {
        Depot::new(Utf8PathBuf::from_path_buf(t.path().to_path_buf()).unwrap())
    }

    fn tree(suffix: &str) -> TreeHash {
        TreeHash::parse(&format!("{}{suffix}", &"0".repeat(40 - suffix.len()))).unwrap()
    }

    /// Materializes a fake package and a manifest referencing it, and logs
    /// the manifest as used. Returns (manifest path, package path).
    fn seed(depot: &Depot, name: &str, hash: TreeHash) -> (Utf8PathBuf, Utf8PathBuf) {
        let name = PackageName::new(name);
        let pkg_path = depot.package_path(&name, hash).unwrap();
        fsx::create_dir_all(&pkg_path).unwrap();
        write_tree_info(&pkg_path, hash).unwrap();

        let mut manifest = Manifest::default();
        manifest.entries.insert(
            Uuid::parse("00000000-0000-0000-0000-000000000001").unwrap(),
            ManifestEntry {
                version: Some(Version::new(1, 0, 0)),
                source: Some(EntrySource::Tree(hash)),
                ..ManifestEntry::new(name)
            },
        );
        let env_dir = depot.root().join("env");
        fsx::create_dir_all(&env_dir).unwrap();
        let manifest_path = env_dir.join("Manifest.toml");
        manifest.write(&manifest_path).unwrap();

        UsageLog::manifest_usage(depot)
            .unwrap()
            .append(&manifest_path)
            .unwrap();
        (manifest_path, pkg_path)
    }

    #[test]
    fn reachable_packages_survive() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let (_, pkg_path) = seed(&depot, "Example", tree("51"));

        let report = gc(&depot, &Ui::default(), Duration::zero()).unwrap();
        assert!(report.deleted.is_empty());
        assert!(pkg_path.is_dir());
    }

    #[test]
    fn unreachable_package_is_deleted_with_zero_delay() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let (manifest_path, pkg_path) = seed(&depot, "Example", tree("51"));

        fsx::remove_file(&manifest_path).unwrap();
        let report = gc(&depot, &Ui::default(), Duration::zero()).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert!(!pkg_path.exists());
        // The now-empty packages/<name>/ directory is swept too.
        assert!(!pkg_path.parent().unwrap().exists());
    }

    #[test]
    fn collect_delay_defers_deletion() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let (manifest_path, pkg_path) = seed(&depot, "Example", tree("51"));
        fsx::remove_file(&manifest_path).unwrap();

        // First run: recorded as orphaned, not deleted.
        let report = gc(&depot, &Ui::default(), Duration::days(7)).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.orphaned.len(), 1);
        assert!(pkg_path.is_dir());

        // A later run past the delay deletes it.
        let report = gc(&depot, &Ui::default(), Duration::zero()).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert!(!pkg_path.exists());
    }

    #[test]
    fn infinite_delay_never_deletes() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let (manifest_path, pkg_path) = seed(&depot, "Example", tree("51"));
        fsx::remove_file(&manifest_path).unwrap();

        for _ in 0..2 {
            let report = gc(&depot, &Ui::default(), Duration::max_value()).unwrap();
            assert!(report.deleted.is_empty());
        }
        assert!(pkg_path.is_dir());
    }

    #[test]
    fn referenced_artifacts_survive_unreferenced_are_collected() {
        let t = tempfile::tempdir().unwrap();
        let depot = depot(&t);
        let (_, pkg_path) = seed(&depot, "Example", tree("51"));

        let kept_hash = tree("a1");
        let doomed_hash = tree("a2");
        let kept = depot.artifact_path(kept_hash);
        let doomed = depot.artifact_path(doomed_hash);
        fsx::create_dir_all(&kept).unwrap();
        fsx::create_dir_all(&doomed).unwrap();

        fsx::write(
            pkg_path.join("Artifacts.toml"),
            format!("[blob]\ngit-tree-sha1 = \"{kept_hash}\"\n"),
        )
        .unwrap();

        let report = gc(&depot, &Ui::default(), Duration::zero()).unwrap();
        assert!(kept.is_dir());
        assert!(!doomed.exists());
        assert_eq!(report.deleted, vec![doomed]);
    }
}
