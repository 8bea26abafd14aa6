//! bibfetch main entry point
//!
//! One subcommand per data source; every source prints a Tellico XML
//! document on stdout, so stderr carries all diagnostics.

use bibfetch::config::load_settings;
use bibfetch::sources::{allocine, bedetheque, dark_horse, griffith, ministerio};
use bibfetch::FetchSession;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bibliographic metadata scrapers for a Tellico-compatible catalog
#[derive(Parser, Debug)]
#[command(name = "bibfetch")]
#[command(version = "1.0.0")]
#[command(about = "Fetch comic/movie/book metadata as Tellico XML", long_about = None)]
struct Cli {
    /// Optional TOML settings file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    source: Source,
}

#[derive(Subcommand, Debug)]
enum Source {
    /// Search the bedetheque.com comic database
    Bedetheque(bedetheque::BedethequeArgs),

    /// Search the Dark Horse Comics catalog
    DarkHorse(dark_horse::DarkHorseArgs),

    /// Search the AlloCiné movie database
    Allocine(allocine::AllocineArgs),

    /// Search the Spanish Ministry of Culture ISBN database
    Ministerio(ministerio::MinisterioArgs),

    /// Import a local Griffith movie collection
    Griffith(griffith::GriffithArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let settings = load_settings(cli.config.as_deref())?;

    match &cli.source {
        Source::Griffith(args) => griffith::run(args)?,
        Source::Bedetheque(args) => {
            let mut session = FetchSession::new(settings)?;
            bedetheque::run(args, &mut session)?;
        }
        Source::DarkHorse(args) => {
            let mut session = FetchSession::new(settings)?;
            dark_horse::run(args, &mut session)?;
        }
        Source::Allocine(args) => {
            let mut session = FetchSession::new(settings)?;
            allocine::run(args, &mut session)?;
        }
        Source::Ministerio(args) => {
            let mut session = FetchSession::new(settings)?;
            ministerio::run(args, &mut session)?;
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level.
/// Diagnostics go to stderr; stdout is reserved for the XML document.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("bibfetch=warn"),
            1 => EnvFilter::new("bibfetch=info"),
            2 => EnvFilter::new("bibfetch=debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}
