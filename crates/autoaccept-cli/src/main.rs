mod commands;
mod host;
mod options;
mod remote;
mod watcher;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::run::RunOptions;
use crate::options::ConfigArgs;

/// autoaccept -- unattended approval of AI assistant prompts.
#[derive(Parser, Debug)]
#[command(name = "autoaccept", version, about)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the agent until `quit` or Ctrl-C
    Run {
        /// Directory whose file activity escalates polling (repeatable)
        #[arg(long, value_name = "DIR")]
        watch: Vec<PathBuf>,

        /// Do not watch the filesystem
        #[arg(long, conflicts_with = "watch")]
        no_watch: bool,

        /// Ignore stdin; stop with Ctrl-C
        #[arg(long)]
        no_stdin: bool,
    },

    /// Run a single acceptance pass and exit
    Accept,

    /// List the targets the remote-debugging endpoint reports
    Targets {
        /// Include targets the agent never connects to
        #[arg(long)]
        all: bool,
    },

    /// Enable remote debugging in the host launch configuration
    Bootstrap {
        /// Launch configuration file (default: ~/.vscode/argv.json)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show every effective setting and where it came from
    Show,
    /// Print the config files that were loaded
    Path,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            watch,
            no_watch,
            no_stdin,
        } => block_on(commands::run::run(
            &cli.config,
            RunOptions {
                watch,
                no_watch,
                no_stdin,
            },
        )),
        Commands::Accept => block_on(commands::accept::run(&cli.config)),
        Commands::Targets { all } => block_on(commands::targets::run(&cli.config, all)),
        Commands::Bootstrap { path } => commands::bootstrap::run(&cli.config, path),
        Commands::Config { action } => match action {
            ConfigCommands::Show => commands::config::show(&cli.config),
            ConfigCommands::Path => commands::config::path(&cli.config),
        },
    }
}

fn block_on<F>(future: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?
        .block_on(future)
}
