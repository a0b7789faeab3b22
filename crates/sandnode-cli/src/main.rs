#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use sandnode_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sandnode")]
#[command(author, version, about = "Resolve and run npm package graphs inside a virtual filesystem", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Project directory mapped to the virtual root
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Print the installed package graph from package-lock.json
    Graph {
        /// Output format for human-readable mode: tree or list
        #[arg(long, default_value = "tree")]
        format: String,
    },

    /// Resolve a specifier without evaluating it
    Resolve {
        /// Specifier as it would appear in `require()`
        specifier: String,

        /// Resolve with plain Node rules relative to this virtual file
        #[arg(long, value_name = "FILE")]
        from: Option<String>,

        #[command(flatten)]
        session: commands::SessionArgs,
    },

    /// Import a module and print its exports
    Import {
        /// Specifier as it would appear in `require()`
        specifier: String,

        #[command(flatten)]
        session: commands::SessionArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd)
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    let command = match cli.command {
        None | Some(Commands::Version) => return commands::version::run(),
        Some(command) => command,
    };

    logging::init(config.verbosity, config.json_logs);
    tracing::debug!(cwd = %config.cwd.display(), "starting");

    match command {
        Commands::Version => commands::version::run(),
        Commands::Graph { format } => commands::graph::run(&config, &format),
        Commands::Resolve {
            specifier,
            from,
            session,
        } => commands::resolve::run(&config, &specifier, from.as_deref(), &session),
        Commands::Import { specifier, session } => {
            commands::import::run(&config, &specifier, &session)
        }
    }
}
