//! jlpkg is a package manager for a dynamic scientific-computing language.
//!
//! It resolves version constraints across registry graphs, materializes
//! content-addressed sources and binary artifacts into a shared depot, and
//! records reproducible environments as project + manifest file pairs.

#![deny(clippy::dbg_macro)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(rust_2018_idioms)]

pub mod core;
pub mod depot;
pub mod flock;
pub mod install;
mod internal;
pub mod ops;
pub mod platform;
pub mod process;
pub mod registry;
pub mod resolver;
pub mod ui;

pub const JLPKG_ENV: &str = "JLPKG";
pub const PROJECT_FILE_NAME: &str = "Project.toml";
pub const MANIFEST_FILE_NAME: &str = "Manifest.toml";
pub const ARTIFACTS_FILE_NAME: &str = "Artifacts.toml";
pub const TREE_INFO_FILE_NAME: &str = ".tree_info.toml";
pub const BUILD_SCRIPT_PATH: &str = "deps/build.jl";

pub const DEPOT_PATH_ENV: &str = "JLPKG_DEPOT_PATH";
pub const PROJECT_ENV: &str = "JLPKG_PROJECT";
pub const PKG_SERVER_ENV: &str = "JLPKG_PKG_SERVER";
pub const DOWNLOAD_ENGINE_ENV: &str = "JLPKG_DOWNLOAD_ENGINE";
pub const COMPRESSION_ENGINE_ENV: &str = "JLPKG_COMPRESSION_ENGINE";
pub const SYMLINK_WORKAROUND_ENV: &str = "JLPKG_COPY_SYMLINKS";
pub const AUTOPRECOMPILE_ENV: &str = "JLPKG_PRECOMPILE_AUTO";
pub const LOG_ENV: &str = "JLPKG_LOG";

pub const DEFAULT_PKG_SERVER: &str = "https://pkg.julialang.org";
