use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::core::TreeHash;

/// Where a repo-tracked package comes from.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct RepoLocation {
    pub url: String,
    pub rev: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
}

/// How a manifest entry locates its source code.
///
/// Exactly one variant identifies a non-stdlib entry; stdlib entries carry no
/// source at all.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum EntrySource {
    /// A registry package addressed by its content tree hash.
    Tree(TreeHash),
    /// A path-tracked (developed) package.
    Path(Utf8PathBuf),
    /// A repo-tracked package; the tree hash is recorded once the revision
    /// has been resolved and is the checkout target during installation.
    Repo {
        location: RepoLocation,
        tree_hash: Option<TreeHash>,
    },
}

impl EntrySource {
    pub fn tree_hash(&self) -> Option<TreeHash> {
        match self {
            EntrySource::Tree(hash) => Some(*hash),
            EntrySource::Repo { tree_hash, .. } => *tree_hash,
            EntrySource::Path(_) => None,
        }
    }

    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            EntrySource::Path(path) => Some(path),
            _ => None,
        }
    }

    pub fn repo(&self) -> Option<&RepoLocation> {
        match self {
            EntrySource::Repo { location, .. } => Some(location),
            _ => None,
        }
    }

    pub fn is_tracking_path(&self) -> bool {
        matches!(self, EntrySource::Path(_))
    }

    pub fn is_tracking_repo(&self) -> bool {
        matches!(self, EntrySource::Repo { .. })
    }

    pub fn is_tracking_registry(&self) -> bool {
        matches!(self, EntrySource::Tree(_))
    }
}

impl fmt::Display for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySource::Tree(hash) => write!(f, "registry tree {hash}"),
            EntrySource::Path(path) => write!(f, "path {path}"),
            EntrySource::Repo { location, .. } => {
                write!(f, "repo {}#{}", location.url, location.rev)
            }
        }
    }
}
