pub use checksum::{Digest, FileHash, TreeHash};
pub use config::Config;
pub use errors::{ConflictError, HashError, RegistryError, ResolverError, SpecError};
pub use manifest::{Manifest, ManifestEntry, ManifestFormat};
pub use name::PackageName;
pub use project::{CompatEntry, Project, SourceSpec, Targets};
pub use source::{EntrySource, RepoLocation};
pub use uuid::Uuid;
pub use version::{VersionBound, VersionRange, VersionSpec};

pub mod checksum;
pub mod config;
pub mod errors;
pub mod manifest;
pub mod name;
pub mod project;
pub mod source;
pub mod stdlib;
pub mod uuid;
pub mod version;
