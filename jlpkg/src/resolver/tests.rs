use std::collections::BTreeMap;
use std::fmt::Write;

use camino::Utf8PathBuf;
use semver::Version;

use super::{resolve, FixedPackage, PreservePolicy, ResolveRequest, Resolution};
use crate::core::{PackageName, ResolverError, Uuid, VersionSpec};
use crate::internal::fsx;
use crate::registry::{RegistryIndex, RegistrySet};

/// One package version in a fixture registry: `(version, deps, compat)`.
/// Compat values use the registry range grammar.
type FixtureVersion<'a> = (&'a str, &'a [(&'a str, &'a str)], &'a [(&'a str, &'a str)]);

struct FixturePackage<'a> {
    name: &'a str,
    uuid: &'a str,
    versions: &'a [FixtureVersion<'a>],
    yanked: &'a [&'a str],
}

fn write_fixture_registry(root: &Utf8PathBuf, packages: &[FixturePackage<'_>]) -> RegistrySet {
    let mut registry_toml = String::from("name = \"Fixture\"\n\n[packages]\n");
    for pkg in packages {
        writeln!(
            registry_toml,
            "{} = {{ name = \"{}\", path = \"{}\" }}",
            pkg.uuid, pkg.name, pkg.name
        )
        .unwrap();
    }
    fsx::create_dir_all(root).unwrap();
    fsx::write(root.join("Registry.toml"), registry_toml).unwrap();

    for pkg in packages {
        let dir = root.join(pkg.name);
        fsx::create_dir_all(&dir).unwrap();
        fsx::write(
            dir.join("Package.toml"),
            format!("name = \"{}\"\nuuid = \"{}\"\n", pkg.name, pkg.uuid),
        )
        .unwrap();

        let mut versions_toml = String::new();
        let mut deps_toml = String::new();
        let mut compat_toml = String::new();
        for (i, (version, deps, compat)) in pkg.versions.iter().enumerate() {
            writeln!(versions_toml, "[\"{version}\"]").unwrap();
            writeln!(versions_toml, "git-tree-sha1 = \"{}\"", fixture_tree(pkg.name, i)).unwrap();
            if pkg.yanked.contains(version) {
                writeln!(versions_toml, "yanked = true").unwrap();
            }
            if !deps.is_empty() {
                writeln!(deps_toml, "[\"{version}\"]").unwrap();
                for (dep_name, dep_uuid) in *deps {
                    writeln!(deps_toml, "{dep_name} = \"{dep_uuid}\"").unwrap();
                }
            }
            if !compat.is_empty() {
                writeln!(compat_toml, "[\"{version}\"]").unwrap();
                for (dep_name, range) in *compat {
                    writeln!(compat_toml, "{dep_name} = \"{range}\"").unwrap();
                }
            }
        }
        fsx::write(dir.join("Versions.toml"), versions_toml).unwrap();
        if !deps_toml.is_empty() {
            fsx::write(dir.join("Deps.toml"), deps_toml).unwrap();
        }
        if !compat_toml.is_empty() {
            fsx::write(dir.join("Compat.toml"), compat_toml).unwrap();
        }
    }

    RegistrySet::new(vec![RegistryIndex::open(root).unwrap()])
}

fn fixture_tree(name: &str, index: usize) -> String {
    let mut tag = 0u64;
    for b in name.bytes() {
        tag = tag.wrapping_mul(31).wrapping_add(b as u64);
    }
    format!("{:024x}{tag:08x}{index:08x}", 0)
}

const UUID_A: &str = "00000000-0000-0000-0000-00000000000a";
const UUID_B: &str = "00000000-0000-0000-0000-00000000000b";
const UUID_C: &str = "00000000-0000-0000-0000-00000000000c";

fn uuid(s: &str) -> Uuid {
    Uuid::parse(s).unwrap()
}

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

fn requirements(entries: &[(&str, &str, &str)]) -> BTreeMap<Uuid, (PackageName, VersionSpec)> {
    entries
        .iter()
        .map(|(name, id, spec)| {
            (
                uuid(id),
                (PackageName::new(name), VersionSpec::parse(spec).unwrap()),
            )
        })
        .collect()
}

fn request<'a>(
    registries: &'a RegistrySet,
    reqs: BTreeMap<Uuid, (PackageName, VersionSpec)>,
) -> ResolveRequest<'a> {
    ResolveRequest {
        registries,
        requirements: reqs,
        fixed: BTreeMap::new(),
        policy: PreservePolicy::None,
        previous: BTreeMap::new(),
        julia_version: Version::new(1, 10, 0),
        installed: None,
    }
}

fn chosen(resolution: &Resolution, id: &str) -> Version {
    resolution.packages[&uuid(id)].version.clone().unwrap()
}

fn temp_root(t: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(t.path().to_path_buf()).unwrap()
}

/// Checks resolver soundness: every compat edge of every selected version is
/// satisfied by the selected version of its target.
fn assert_sound(registries: &RegistrySet, resolution: &Resolution, julia: &Version) {
    for (pkg_uuid, package) in &resolution.packages {
        let Some(version) = &package.version else {
            continue;
        };
        let Some(view) = registries.query(*pkg_uuid).unwrap() else {
            continue;
        };
        if !view.versions.contains_key(version) {
            continue;
        }
        let compat = view.compat_for(version);
        for (dep_name, dep_uuid) in view.deps_for(version) {
            let spec = compat.get(&dep_name).cloned().unwrap_or_else(VersionSpec::any);
            let dep_version = if dep_uuid.is_julia() {
                julia.clone()
            } else {
                resolution.packages[&dep_uuid]
                    .version
                    .clone()
                    .expect("dep must be assigned")
            };
            assert!(
                spec.contains(&dep_version),
                "{} v{version} requires {dep_name} in {spec}, got {dep_version}",
                package.name
            );
        }
    }
}

#[test]
fn simple_add_picks_latest_satisfying() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[FixturePackage {
            name: "Example",
            uuid: UUID_A,
            versions: &[
                ("0.5.0", &[], &[("julia", "1")]),
                ("0.5.1", &[], &[("julia", "1")]),
                ("0.6.0", &[], &[("julia", "1")]),
            ],
            yanked: &[],
        }],
    );

    let req = request(&registries, requirements(&[("Example", UUID_A, "0.5")]));
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("0.5.1"));
    assert!(resolution.packages[&uuid(UUID_A)].tree_hash.is_some());
    assert_sound(&registries, &resolution, &req.julia_version);

    // Re-resolving with identical inputs yields the identical assignment.
    let again = resolve(&req).unwrap();
    assert_eq!(again.packages, resolution.packages);
}

#[test]
fn transitive_upgrade_keeps_unaffected_dep() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[
            FixturePackage {
                name: "A",
                uuid: UUID_A,
                versions: &[
                    ("1.2.0", &[("B", UUID_B)], &[("B", "1")]),
                    ("1.3.0", &[("B", UUID_B)], &[("B", "1.5-1")]),
                ],
                yanked: &[],
            },
            FixturePackage {
                name: "B",
                uuid: UUID_B,
                versions: &[("1.4.0", &[], &[]), ("1.9.0", &[], &[])],
                yanked: &[],
            },
        ],
    );

    let mut req = request(&registries, requirements(&[("A", UUID_A, "*")]));
    req.previous = BTreeMap::from([(uuid(UUID_A), v("1.2.0")), (uuid(UUID_B), v("1.9.0"))]);
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("1.3.0"));
    assert_eq!(chosen(&resolution, UUID_B), v("1.9.0"));
    assert_sound(&registries, &resolution, &req.julia_version);
}

#[test]
fn unsatisfiable_names_the_tightest_conflict() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[
            FixturePackage {
                name: "A",
                uuid: UUID_A,
                versions: &[("1.0.0", &[("C", UUID_C)], &[("C", "1")])],
                yanked: &[],
            },
            FixturePackage {
                name: "B",
                uuid: UUID_B,
                versions: &[("1.0.0", &[("C", UUID_C)], &[("C", "2")])],
                yanked: &[],
            },
            FixturePackage {
                name: "C",
                uuid: UUID_C,
                versions: &[("1.0.0", &[], &[]), ("2.0.0", &[], &[])],
                yanked: &[],
            },
        ],
    );

    let req = request(
        &registries,
        requirements(&[("A", UUID_A, "1"), ("B", UUID_B, "1")]),
    );
    let err = resolve(&req).unwrap_err();
    let err = err.downcast::<ResolverError>().unwrap();
    match err {
        ResolverError::Unsatisfiable {
            uuid: conflict,
            name,
            available,
            ..
        } => {
            assert_eq!(conflict, uuid(UUID_C));
            assert_eq!(name, PackageName::new("C"));
            assert_eq!(available, vec![v("1.0.0"), v("2.0.0")]);
        }
        other => panic!("expected Unsatisfiable, got {other:?}"),
    }
}

#[test]
fn pinned_package_survives_up() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[FixturePackage {
            name: "A",
            uuid: UUID_A,
            versions: &[("1.0.0", &[], &[]), ("1.1.0", &[], &[])],
            yanked: &[],
        }],
    );

    let mut req = request(&registries, BTreeMap::new());
    req.fixed.insert(
        uuid(UUID_A),
        FixedPackage {
            name: PackageName::new("A"),
            version: Some(v("1.0.0")),
            deps: BTreeMap::new(),
            compat: BTreeMap::new(),
        },
    );
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("1.0.0"));
    assert!(resolution.packages[&uuid(UUID_A)].fixed);
}

#[test]
fn backtracks_to_compatible_older_version() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[
            FixturePackage {
                name: "A",
                uuid: UUID_A,
                versions: &[
                    ("1.0.0", &[("C", UUID_C)], &[("C", "1")]),
                    ("2.0.0", &[("C", UUID_C)], &[("C", "2")]),
                ],
                yanked: &[],
            },
            FixturePackage {
                name: "B",
                uuid: UUID_B,
                versions: &[("1.0.0", &[("C", UUID_C)], &[("C", "1")])],
                yanked: &[],
            },
            FixturePackage {
                name: "C",
                uuid: UUID_C,
                versions: &[("1.0.0", &[], &[]), ("2.0.0", &[], &[])],
                yanked: &[],
            },
        ],
    );

    let req = request(
        &registries,
        requirements(&[("A", UUID_A, "*"), ("B", UUID_B, "*")]),
    );
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("1.0.0"));
    assert_eq!(chosen(&resolution, UUID_C), v("1.0.0"));
    assert_sound(&registries, &resolution, &req.julia_version);
}

#[test]
fn yanked_versions_are_excluded() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[FixturePackage {
            name: "A",
            uuid: UUID_A,
            versions: &[("1.0.0", &[], &[]), ("1.1.0", &[], &[])],
            yanked: &["1.1.0"],
        }],
    );

    let req = request(&registries, requirements(&[("A", UUID_A, "*")]));
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("1.0.0"));
}

#[test]
fn pinned_yanked_version_is_kept() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[FixturePackage {
            name: "A",
            uuid: UUID_A,
            versions: &[("1.0.0", &[], &[]), ("1.1.0", &[], &[])],
            yanked: &["1.0.0"],
        }],
    );

    let mut req = request(&registries, BTreeMap::new());
    req.fixed.insert(
        uuid(UUID_A),
        FixedPackage {
            name: PackageName::new("A"),
            version: Some(v("1.0.0")),
            deps: BTreeMap::new(),
            compat: BTreeMap::new(),
        },
    );
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("1.0.0"));
}

#[test]
fn unknown_package_is_reported() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(&temp_root(&t), &[]);

    let req = request(&registries, requirements(&[("Ghost", UUID_A, "*")]));
    let err = resolve(&req).unwrap_err();
    let err = err.downcast::<ResolverError>().unwrap();
    assert!(matches!(err, ResolverError::UnknownPackage { .. }));
}

#[test]
fn host_version_constrains_selection() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[FixturePackage {
            name: "A",
            uuid: UUID_A,
            versions: &[
                ("1.0.0", &[], &[("julia", "1.0-1.10")]),
                ("2.0.0", &[], &[("julia", "1.11-1")]),
            ],
            yanked: &[],
        }],
    );

    let mut req = request(&registries, requirements(&[("A", UUID_A, "*")]));
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("1.0.0"));

    req.julia_version = Version::new(1, 11, 2);
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("2.0.0"));
}

#[test]
fn preserve_all_keeps_previous_versions_of_non_roots() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[
            FixturePackage {
                name: "A",
                uuid: UUID_A,
                versions: &[("1.0.0", &[("B", UUID_B)], &[]), ("1.1.0", &[("B", UUID_B)], &[])],
                yanked: &[],
            },
            FixturePackage {
                name: "B",
                uuid: UUID_B,
                versions: &[("0.9.0", &[], &[]), ("1.0.0", &[], &[])],
                yanked: &[],
            },
        ],
    );

    let mut req = request(&registries, requirements(&[("A", UUID_A, "*")]));
    req.policy = PreservePolicy::All;
    req.previous = BTreeMap::from([(uuid(UUID_B), v("0.9.0"))]);
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("1.1.0"));
    assert_eq!(chosen(&resolution, UUID_B), v("0.9.0"));
}

#[test]
fn tiered_policy_falls_back_when_preservation_is_impossible() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[
            FixturePackage {
                name: "A",
                uuid: UUID_A,
                versions: &[
                    ("1.0.0", &[("B", UUID_B)], &[("B", "1.0.0")]),
                    ("2.0.0", &[("B", UUID_B)], &[("B", "2")]),
                ],
                yanked: &[],
            },
            FixturePackage {
                name: "B",
                uuid: UUID_B,
                versions: &[("1.0.0", &[], &[]), ("2.0.0", &[], &[])],
                yanked: &[],
            },
        ],
    );

    // The previous manifest had A 1.0.0 + B 1.0.0; the new requirement forces
    // A 2.0.0, which needs B 2.x. `All` preservation cannot hold B back, so
    // the ladder must fall through and still produce an assignment.
    let mut req = request(&registries, requirements(&[("A", UUID_A, "2")]));
    req.policy = PreservePolicy::Tiered;
    req.previous = BTreeMap::from([(uuid(UUID_A), v("1.0.0")), (uuid(UUID_B), v("1.0.0"))]);
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("2.0.0"));
    assert_eq!(chosen(&resolution, UUID_B), v("2.0.0"));
    assert_sound(&registries, &resolution, &req.julia_version);
}

#[test]
fn maximality_under_none_policy() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[
            FixturePackage {
                name: "A",
                uuid: UUID_A,
                versions: &[("1.0.0", &[], &[]), ("1.5.0", &[], &[]), ("2.0.0", &[], &[])],
                yanked: &[],
            },
            FixturePackage {
                name: "B",
                uuid: UUID_B,
                versions: &[("0.1.0", &[], &[]), ("0.2.0", &[], &[])],
                yanked: &[],
            },
        ],
    );

    let req = request(
        &registries,
        requirements(&[("A", UUID_A, "*"), ("B", UUID_B, "*")]),
    );
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_A), v("2.0.0"));
    assert_eq!(chosen(&resolution, UUID_B), v("0.2.0"));
}

#[test]
fn path_tracked_fixed_package_contributes_its_deps() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(
        &temp_root(&t),
        &[FixturePackage {
            name: "B",
            uuid: UUID_B,
            versions: &[("1.0.0", &[], &[]), ("2.0.0", &[], &[])],
            yanked: &[],
        }],
    );

    // A is developed from a local path and has no version of its own; its
    // declared deps come from its project file, not from any registry.
    let mut req = request(&registries, BTreeMap::new());
    req.fixed.insert(
        uuid(UUID_A),
        FixedPackage {
            name: PackageName::new("A"),
            version: None,
            deps: BTreeMap::from([(PackageName::new("B"), uuid(UUID_B))]),
            compat: BTreeMap::from([(PackageName::new("B"), VersionSpec::parse("^1").unwrap())]),
        },
    );
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_B), v("1.0.0"));
    let a = &resolution.packages[&uuid(UUID_A)];
    assert!(a.fixed);
    assert!(a.version.is_none());
    assert_eq!(a.deps[&PackageName::new("B")], uuid(UUID_B));
}

/// Weak deps never pull a package into the graph, but their compat applies
/// once something else did.
#[test]
fn weak_compat_constrains_present_packages_only() {
    let t = tempfile::tempdir().unwrap();
    let root = temp_root(&t);
    let registries = write_fixture_registry(
        &root,
        &[
            FixturePackage {
                name: "A",
                uuid: UUID_A,
                versions: &[("1.0.0", &[], &[])],
                yanked: &[],
            },
            FixturePackage {
                name: "B",
                uuid: UUID_B,
                versions: &[("1.0.0", &[("C", UUID_C)], &[])],
                yanked: &[],
            },
            FixturePackage {
                name: "C",
                uuid: UUID_C,
                versions: &[("1.0.0", &[], &[]), ("2.0.0", &[], &[])],
                yanked: &[],
            },
        ],
    );
    // A 1.0.0 weakly depends on C within ^1.
    fsx::write(
        root.join("A/WeakDeps.toml"),
        format!("[\"1.0.0\"]\nC = \"{UUID_C}\"\n"),
    )
    .unwrap();
    fsx::write(root.join("A/WeakCompat.toml"), "[\"1.0.0\"]\nC = \"1\"\n").unwrap();
    drop(registries);
    let registries = RegistrySet::new(vec![RegistryIndex::open(&root).unwrap()]);

    // Alone, A resolves without C ever entering the picture.
    let req = request(&registries, requirements(&[("A", UUID_A, "*")]));
    let resolution = resolve(&req).unwrap();
    assert!(!resolution.packages.contains_key(&uuid(UUID_C)));

    // With B pulling C in, A's weak compat holds C back to 1.x.
    let req = request(
        &registries,
        requirements(&[("A", UUID_A, "*"), ("B", UUID_B, "*")]),
    );
    let resolution = resolve(&req).unwrap();
    assert_eq!(chosen(&resolution, UUID_C), v("1.0.0"));
}

#[test]
fn contradictory_fixed_cycle_is_reported() {
    let t = tempfile::tempdir().unwrap();
    let registries = write_fixture_registry(&temp_root(&t), &[]);

    let mut req = request(&registries, BTreeMap::new());
    req.fixed.insert(
        uuid(UUID_A),
        FixedPackage {
            name: PackageName::new("A"),
            version: Some(v("1.0.0")),
            deps: BTreeMap::from([(PackageName::new("B"), uuid(UUID_B))]),
            compat: BTreeMap::from([(PackageName::new("B"), VersionSpec::parse("^2").unwrap())]),
        },
    );
    req.fixed.insert(
        uuid(UUID_B),
        FixedPackage {
            name: PackageName::new("B"),
            version: Some(v("1.0.0")),
            deps: BTreeMap::from([(PackageName::new("A"), uuid(UUID_A))]),
            compat: BTreeMap::from([(PackageName::new("A"), VersionSpec::parse("^1").unwrap())]),
        },
    );
    let err = resolve(&req).unwrap_err();
    let err = err.downcast::<ResolverError>().unwrap();
    assert!(matches!(err, ResolverError::Cycle { .. }));
}
