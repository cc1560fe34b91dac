//! Minimal git plumbing: bare clones in the depot and tree-addressed
//! checkouts, driven through the `git` command line.

use std::process::Command;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::debug;

use crate::core::source::RepoLocation;
use crate::core::TreeHash;
use crate::depot::Depot;
use crate::internal::fsx;
use crate::process;
use crate::ui::Ui;

pub struct GitClones<'a> {
    depot: &'a Depot,
    ui: &'a Ui,
}

impl<'a> GitClones<'a> {
    pub fn new(depot: &'a Depot, ui: &'a Ui) -> Self {
        Self { depot, ui }
    }

    /// Ensures `clones/<hash-of-url>` holds an up-to-date bare clone and
    /// returns its path.
    pub fn ensure_clone(&self, url: &str) -> Result<camino::Utf8PathBuf> {
        let clone = self.depot.clone_path(url);
        if clone.is_dir() {
            debug!("fetching updates for `{url}`");
            process::exec(
                Command::new("git")
                    .arg("-C")
                    .arg(&clone)
                    .args(["fetch", "--tags", "--force", "origin"]),
                self.ui,
            )
            .with_context(|| format!("failed to fetch `{url}`"))?;
        } else {
            fsx::create_dir_all(clone.parent().expect("clones dir has a parent"))?;
            process::exec(
                Command::new("git")
                    .args(["clone", "--bare", url])
                    .arg(&clone),
                self.ui,
            )
            .with_context(|| format!("failed to clone `{url}`"))?;
        }
        Ok(clone)
    }

    /// Resolves a revision to the tree hash it points at.
    pub fn resolve_tree(&self, location: &RepoLocation) -> Result<TreeHash> {
        self.ensure_clone(&location.url)?;
        let clone = self.depot.clone_path(&location.url);
        let spec = match &location.subdir {
            // A subdir narrows the revision to the tree of that directory.
            Some(subdir) => format!("{}^{{tree}}:{subdir}", location.rev),
            None => format!("{}^{{tree}}", location.rev),
        };
        let out = process::output(
            Command::new("git")
                .arg("-C")
                .arg(&clone)
                .args(["rev-parse", &spec]),
            self.ui,
        )
        .with_context(|| {
            format!(
                "failed to resolve revision `{}` of `{}`",
                location.rev, location.url
            )
        })?;
        TreeHash::parse(out.trim())
    }

    /// Materializes a tree from the clone into `dest` without a `.git`
    /// directory, using a throwaway index.
    pub fn checkout_tree(&self, url: &str, tree: TreeHash, dest: &Utf8Path) -> Result<()> {
        let clone = self.depot.clone_path(url);
        fsx::create_dir_all(dest)?;
        let index = tempfile::Builder::new()
            .prefix(".jlpkg-index-")
            .tempfile()
            .context("failed to create temporary git index")?;

        process::exec(
            Command::new("git")
                .env("GIT_INDEX_FILE", index.path())
                .arg("-C")
                .arg(&clone)
                .args(["read-tree", &tree.to_string()]),
            self.ui,
        )
        .with_context(|| format!("failed to read tree {tree} from `{url}`"))?;

        let prefix = format!("{dest}/");
        process::exec(
            Command::new("git")
                .env("GIT_INDEX_FILE", index.path())
                .arg("-C")
                .arg(&clone)
                .args(["checkout-index", "-a", "-f", "--prefix", &prefix]),
            self.ui,
        )
        .with_context(|| format!("failed to materialize tree {tree} into `{dest}`"))?;
        Ok(())
    }
}
