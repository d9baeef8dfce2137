mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::hook::HookSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "specflow",
    about = "Gated spec workflows and workspace hooks for coding agents",
    version,
    propagate_version = true
)]
struct Cli {
    /// Workspace root (default: auto-detect from .specflow/ or .git/)
    #[arg(long, global = true, env = "SPECFLOW_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .specflow/ with default config
    Init,

    /// Manage hooks
    Hook {
        #[command(subcommand)]
        subcommand: HookSubcommand,
    },

    /// Fire an event at every matching hook
    Dispatch {
        /// Event type (file_save, message_sent, session_created, agent_complete, manual)
        event: String,
        /// Saved file path, relative to the workspace root
        #[arg(long)]
        file: Option<String>,
        /// Message text for message_sent
        #[arg(long)]
        message: Option<String>,
    },

    /// Watch specs, hooks and steering and hot-reload on change
    Watch,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Watch => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Hook { subcommand } => cmd::hook::run(&root, subcommand, cli.json),
        Commands::Dispatch {
            event,
            file,
            message,
        } => cmd::dispatch::run(&root, &event, file, message, cli.json),
        Commands::Watch => cmd::watch::run(&root),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
