use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use jlpkg::ops::DepMode;
use jlpkg::resolver::{PreservePolicy, UpgradeLevel};
use jlpkg::ui::OutputFormat;

/// A package manager for a dynamic scientific-computing language.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Path to the environment directory (containing Project.toml).
    #[arg(long, global = true, env = "JLPKG_PROJECT")]
    pub project: Option<Utf8PathBuf>,

    /// Never touch the network.
    #[arg(long, global = true)]
    pub offline: bool,

    /// Print machine-readable JSON instead of human text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Print more details.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Print less.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add packages to the project and install them.
    Add {
        /// Package specs: `name`, `uuid`, `name=uuid`, optionally with
        /// `@versionspec` or `#rev`; or a path or URL.
        specs: Vec<String>,
        #[arg(long, value_enum, default_value_t)]
        preserve: PreservePolicy,
    },
    /// Track a package from a local path or clone, for development.
    #[command(alias = "dev")]
    Develop { specs: Vec<String> },
    /// Remove packages.
    Rm {
        specs: Vec<String>,
        #[arg(long, value_enum, default_value_t)]
        mode: DepMode,
    },
    /// Upgrade packages.
    Up {
        specs: Vec<String>,
        #[arg(long, value_enum, default_value_t)]
        level: UpgradeLevel,
        #[arg(long, value_enum, default_value_t = PreservePolicy::None)]
        preserve: PreservePolicy,
    },
    /// Pin packages at their current versions.
    Pin { specs: Vec<String> },
    /// Undo pinning and path/repo tracking.
    Free { specs: Vec<String> },
    /// Download and install everything the manifest records, without
    /// re-resolving.
    Instantiate,
    /// Re-run the resolver against the current project.
    Resolve {
        #[arg(long, value_enum, default_value_t)]
        preserve: PreservePolicy,
    },
    /// Resolve and install the test target, ready for the host tooling to
    /// run the suite.
    Test,
    /// Run build recipes of installed packages, in dependency order.
    Build,
    /// Precompile the environment (drains the build queue).
    Precompile,
    /// Delete installations no environment references anymore.
    Gc {
        /// Grace period in days before an orphan is deleted.
        #[arg(long)]
        collect_delay: Option<i64>,
        /// Collect immediately, ignoring the grace period.
        #[arg(long)]
        all: bool,
    },
    /// Show the environment's resolved state.
    #[command(alias = "st")]
    Status,
    /// Print the environment a directory would activate.
    Activate { path: Option<Utf8PathBuf> },
}
