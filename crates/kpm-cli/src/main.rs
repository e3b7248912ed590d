#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

mod commands;
mod logging;

use clap::Parser;
use kpm_core::Config;
use miette::Result;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "kpm")]
#[command(author, version, about = "Resolve library dependency graphs and sync package repositories", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Record the files added to or removed from a repository in its change log
    Commit {
        /// Repository directory
        repo: PathBuf,
    },

    /// Send unsent changes of a local repository to another repository
    Push {
        /// Local repository directory
        local: PathBuf,

        /// Target repository: a directory or an http(s) URL
        remote: String,
    },

    /// Fetch unseen changes of another repository into a local repository
    Pull {
        /// Local repository directory
        local: PathBuf,

        /// Source repository: a directory or an http(s) URL
        remote: String,
    },

    /// Resolve a project's dependency graph
    Graph {
        /// Project directory (containing project.json)
        project: PathBuf,

        /// Package folder (defaults to the channel's package folder)
        #[arg(long, value_name = "DIR")]
        packages: Option<PathBuf>,

        /// Target framework
        #[arg(long, default_value = "net45")]
        framework: String,

        /// Output format: tree or list
        #[arg(long, default_value = "tree", value_parser = ["tree", "list"])]
        format: String,

        /// Also collect the references a compilation of the project needs
        #[arg(long)]
        exports: bool,
    },
}

/// Resolve `path` against the working directory.
fn resolve_path(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Resolve a repository location; URLs pass through untouched.
fn resolve_location(cwd: &Path, location: &str) -> String {
    if kpm_core::repository::is_remote(location) {
        location.to_string()
    } else {
        resolve_path(cwd, Path::new(location)).display().to_string()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::from_env(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Commands::Version => commands::version::run(cli.json),
        Commands::Commit { repo } => {
            commands::sync::commit(&config, &resolve_path(&cwd, &repo), cli.json)
        }
        Commands::Push { local, remote } => commands::sync::push(
            &config,
            &resolve_path(&cwd, &local),
            &resolve_location(&cwd, &remote),
            cli.json,
        ),
        Commands::Pull { local, remote } => commands::sync::pull(
            &config,
            &resolve_path(&cwd, &local),
            &resolve_location(&cwd, &remote),
            cli.json,
        ),
        Commands::Graph {
            project,
            packages,
            framework,
            format,
            exports,
        } => commands::graph::run(
            &config,
            &commands::graph::GraphArgs {
                project: resolve_path(&cwd, &project),
                packages: packages.map(|p| resolve_path(&cwd, &p)),
                framework,
                format,
                exports,
            },
            cli.json,
        ),
    }
}
