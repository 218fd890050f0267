use clap::{Parser, Subcommand};
use scurry_core::execution::{RunnerOptions, DEFAULT_CONCURRENCY};

mod commands;
mod render;

/// Scurry - a workspace-aware script runner
#[derive(Parser)]
#[command(name = "scurry")]
#[command(about = "Run package scripts across a workspace, dependencies first")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script or command
    Run {
        /// The command to run; everything after the first word is forwarded to it
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Run across every workspace package, dependencies first
        #[arg(short, long)]
        recursive: bool,

        /// Only select packages matching this glob; a `+` prefix pulls in their dependencies
        #[arg(long)]
        filter: Option<String>,

        /// Maximum number of processes running at once
        #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,

        /// Treat the invoked command as a build script with change detection
        #[arg(short, long)]
        build: bool,

        /// Ignore recorded snapshots and rebuild everything
        #[arg(long)]
        rebuild: bool,

        /// Show what would run without spawning anything
        #[arg(long)]
        dry_run: bool,

        /// Pass child process output through untouched
        #[arg(long)]
        raw: bool,

        /// Suppress output; failed processes report their transcript instead
        #[arg(long)]
        silent: bool,

        /// Include the workspace root package itself
        #[arg(long)]
        root: bool,
    },
    /// List workspace packages and their scripts
    List {
        /// Only list packages matching this glob
        #[arg(long)]
        filter: Option<String>,

        /// Include the workspace root package itself
        #[arg(long)]
        root: bool,
    },
    /// Show the workspace layout and dependency graph
    Info {
        /// Only show packages matching this glob
        #[arg(long)]
        filter: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Execute command (CLI layer only handles presentation)
    match cli.command {
        Commands::Run {
            command,
            recursive,
            filter,
            concurrency,
            build,
            rebuild,
            dry_run,
            raw,
            silent,
            root,
        } => {
            let options = RunnerOptions {
                concurrency,
                filter,
                build,
                rebuild,
                dry_run,
                raw,
                silent,
                root,
                cwd: None,
            };
            commands::run::execute(options, &command.join(" "), recursive).await
        }
        Commands::List { filter, root } => commands::list::execute(filter, root),
        Commands::Info { filter } => commands::info::execute(filter),
    }
}
