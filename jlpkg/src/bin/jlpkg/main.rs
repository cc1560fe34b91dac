use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use jlpkg::core::{Config, ResolverError};
use jlpkg::depot::Depot;
use jlpkg::ui::{Ui, Verbosity};
use jlpkg::LOG_ENV;

use crate::args::Args;

mod args;
mod commands;

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_env(LOG_ENV))
        .init();

    let verbosity = if args.quiet {
        Verbosity::Quiet
    } else if args.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };
    let ui = Ui::new(verbosity, args.output_format());

    match run(args, ui) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let ui = Ui::new(verbosity, jlpkg::ui::OutputFormat::Text);
            ui.anyhow(&err);
            exit_code(&err)
        }
    }
}

fn run(args: Args, ui: Ui) -> Result<()> {
    let depot = Depot::discover()?;
    let config = Config::init(depot, ui, args.offline)?;
    commands::run(args, &config)
}

/// `0` on success, `1` on resolver failure, `2` on I/O failure.
fn exit_code(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return ExitCode::from(2);
        }
        if cause.downcast_ref::<ResolverError>().is_some() {
            return ExitCode::from(1);
        }
    }
    ExitCode::from(1)
}
