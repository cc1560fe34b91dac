//! Expansion of the range-compressed tables used by compat and deps files.

use std::collections::BTreeMap;

use semver::Version;

use crate::core::{PackageName, RegistryError, VersionRange};

/// One parsed row of a range-compressed file.
pub struct CompressedRow<T> {
    pub range: VersionRange,
    pub entries: BTreeMap<String, T>,
}

/// Assigns every row to the versions its range covers.
///
/// Versions are sorted first and each range is matched by linear scan, so a
/// row lands on the contiguous window of known versions it covers. Two ranges
/// assigning *different* values to the same `(version, key)` pair is an error;
/// repeating the same value is tolerated.
pub fn expand<T: Clone + PartialEq>(
    package: &PackageName,
    file: &str,
    versions: impl IntoIterator<Item = Version>,
    rows: &[CompressedRow<T>],
) -> Result<BTreeMap<Version, BTreeMap<String, T>>, RegistryError> {
    let mut versions: Vec<Version> = versions.into_iter().collect();
    versions.sort();

    let mut expanded: BTreeMap<Version, BTreeMap<String, T>> = BTreeMap::new();
    for row in rows {
        let Some(first) = versions.iter().position(|v| row.range.contains(v)) else {
            continue;
        };
        let last = versions
            .iter()
            .rposition(|v| row.range.contains(v))
            .expect("a forward match implies a backward match");
        for version in &versions[first..=last] {
            if !row.range.contains(version) {
                continue;
            }
            let slot = expanded.entry(version.clone()).or_default();
            for (key, value) in &row.entries {
                match slot.get(key) {
                    Some(existing) if existing != value => {
                        return Err(RegistryError::OverlappingCompat {
                            name: package.clone(),
                            file: file.to_string(),
                            version: version.clone(),
                            key: key.clone(),
                        });
                    }
                    _ => {
                        slot.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use semver::Version;

    use super::{expand, CompressedRow};
    use crate::core::{PackageName, RegistryError};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn row(range: &str, entries: &[(&str, &str)]) -> CompressedRow<String> {
        CompressedRow {
            range: range.parse().unwrap(),
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn rows_land_on_their_windows() {
        let versions = vec![v("0.4.0"), v("0.5.0"), v("0.5.1"), v("0.6.0")];
        let rows = vec![
            row("0.4", &[("Old", "1")]),
            row("0.5-0.6", &[("New", "2")]),
        ];
        let expanded =
            expand(&PackageName::new("Example"), "Deps.toml", versions, &rows).unwrap();

        assert_eq!(expanded[&v("0.4.0")]["Old"], "1");
        assert!(!expanded[&v("0.4.0")].contains_key("New"));
        assert_eq!(expanded[&v("0.5.0")]["New"], "2");
        assert_eq!(expanded[&v("0.6.0")]["New"], "2");
    }

    #[test]
    fn versions_not_covered_get_no_row() {
        let versions = vec![v("1.0.0"), v("2.0.0")];
        let rows = vec![row("1", &[("Dep", "x")])];
        let expanded =
            expand(&PackageName::new("Example"), "Deps.toml", versions, &rows).unwrap();
        assert!(expanded.contains_key(&v("1.0.0")));
        assert!(!expanded.contains_key(&v("2.0.0")));
    }

    #[test]
    fn conflicting_assignment_is_an_error() {
        let versions = vec![v("0.5.0")];
        let rows = vec![row("0.5", &[("Dep", "1")]), row("0-1", &[("Dep", "2")])];
        let err = expand(&PackageName::new("Example"), "Compat.toml", versions, &rows)
            .unwrap_err();
        assert!(matches!(err, RegistryError::OverlappingCompat { .. }));
    }

    #[test]
    fn identical_assignment_from_two_ranges_is_tolerated() {
        let versions = vec![v("0.5.0")];
        let rows = vec![row("0.5", &[("Dep", "1")]), row("0-1", &[("Dep", "1")])];
        let expanded =
            expand(&PackageName::new("Example"), "Compat.toml", versions, &rows).unwrap();
        assert_eq!(expanded[&v("0.5.0")]["Dep"], "1");
    }
}
