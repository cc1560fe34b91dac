use clap::ValueEnum;
use semver::Version;

use crate::core::{VersionBound, VersionRange, VersionSpec};

/// Restricts which versions may change relative to the prior manifest.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum PreservePolicy {
    /// No restriction.
    None,
    /// Try `All`; on unsatisfiability fall back to `Direct`, then `Semver`,
    /// then `None`.
    #[default]
    Tiered,
    /// Every non-root keeps exactly its previous manifest version.
    All,
    /// Indirect deps are pinned to previous versions; direct deps are free.
    Direct,
    /// The previous version's major line is preserved.
    Semver,
    /// [`PreservePolicy::Tiered`], additionally restricted to
    /// already-downloaded tree hashes at every tier.
    TieredInstalled,
    /// [`PreservePolicy::All`], additionally restricted to already-downloaded
    /// tree hashes.
    AllInstalled,
}

impl PreservePolicy {
    /// The concrete tiers this policy tries, in order.
    pub fn tiers(self) -> Vec<PreserveTier> {
        use PreserveTier::*;
        match self {
            PreservePolicy::None => vec![Free],
            PreservePolicy::All => vec![All],
            PreservePolicy::Direct => vec![Direct],
            PreservePolicy::Semver => vec![Semver],
            PreservePolicy::Tiered => vec![All, Direct, Semver, Free],
            PreservePolicy::AllInstalled => vec![All],
            PreservePolicy::TieredInstalled => vec![All, Direct, Semver, Free],
        }
    }

    pub fn installed_only(self) -> bool {
        matches!(
            self,
            PreservePolicy::TieredInstalled | PreservePolicy::AllInstalled
        )
    }
}

/// One concrete restriction level; see [`PreservePolicy`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PreserveTier {
    Free,
    Semver,
    Direct,
    All,
}

impl PreserveTier {
    /// The candidate restriction for one package, given its previous version.
    ///
    /// `is_root` marks direct requirements; those are driven by their
    /// requirement specs rather than preservation and stay unrestricted.
    pub fn restriction(self, previous: &Version, is_root: bool) -> Option<VersionSpec> {
        match self {
            PreserveTier::Free => None,
            PreserveTier::Semver => Some(same_major(previous)),
            PreserveTier::Direct if is_root => None,
            PreserveTier::Direct => Some(VersionSpec::exact(previous)),
            PreserveTier::All if is_root => None,
            PreserveTier::All => Some(VersionSpec::exact(previous)),
        }
    }
}

fn same_major(v: &Version) -> VersionSpec {
    let bound = VersionBound::new([v.major, 0, 0], 1);
    VersionSpec::from_ranges(vec![VersionRange::new(bound, bound)])
}

/// A ceiling on how far `up` may move each direct dep.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum UpgradeLevel {
    /// Any registered version.
    #[default]
    Major,
    /// Stay within the previous major line.
    Minor,
    /// Stay within the previous minor line.
    Patch,
    /// Keep the previous version.
    Fixed,
}

impl UpgradeLevel {
    pub fn ceiling_spec(self, previous: &Version) -> Option<VersionSpec> {
        let range = match self {
            UpgradeLevel::Major => return None,
            UpgradeLevel::Minor => {
                let b = VersionBound::new([previous.major, 0, 0], 1);
                VersionRange::new(b, b)
            }
            UpgradeLevel::Patch => {
                let b = VersionBound::new([previous.major, previous.minor, 0], 2);
                VersionRange::new(b, b)
            }
            UpgradeLevel::Fixed => VersionRange::exact(previous),
        };
        Some(VersionSpec::from_ranges(vec![range]))
    }
}
