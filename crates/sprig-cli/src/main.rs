mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{is_configuration_message, EXIT_CONFIG_ERROR, EXIT_FAILURE};
use sprig_core::{install_signal_handler, FinishOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "sprig",
    version,
    about = "Per-branch development environments: worktree, database, storage and browser session"
)]
struct Cli {
    /// Run as if sprig was started in this directory.
    #[arg(short = 'C', long = "dir", global = true)]
    dir: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision an environment from a branch name or issue number.
    Up {
        /// Branch name, or an issue number to derive the branch from.
        name: String,
        /// Run the configured open commands afterwards, or this command instead.
        #[arg(short, long, num_args = 0..=1, value_name = "CMD")]
        open: Option<Option<String>>,
    },
    /// Tear down an environment and every resource it owns.
    Down {
        /// Environment name or a unique part of it.
        env: String,
        /// Skip the uncommitted-changes and unmerged-commits checks.
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Restart the browser debug session of an environment.
    Browser {
        /// Environment name or a unique part of it.
        env: String,
    },
    /// Merge an environment into mainline and tear it down.
    Finish {
        /// Environment name or a unique part of it.
        env: String,
        /// Go through a pull request instead of merging locally.
        #[arg(short, long, default_value_t = false)]
        pull_request: bool,
        /// Squash the branch into a single commit.
        #[arg(short, long, default_value_t = false)]
        squash: bool,
    },
    /// List live environments with their ports and databases.
    #[command(alias = "list")]
    Ls,
    /// Run or manage database migrations of an environment.
    Migrate {
        /// Environment name or a unique part of it.
        env: String,
        #[command(subcommand)]
        action: MigrateCommand,
    },
    /// Check external tools, configuration and project state.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum MigrateCommand {
    /// Apply pending migrations.
    Run,
    /// Create a new migration.
    Add {
        /// Migration name.
        name: String,
    },
    /// Revert the most recent migration.
    Remove,
    /// List migrations.
    List,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SPRIG_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let dir = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let json = cli.json;

    let result = match cli.command {
        Commands::Up { name, open } => commands::up::run(&dir, &name, open, json),
        Commands::Down { env, force } => commands::down::run(&dir, &env, force, json),
        Commands::Browser { env } => commands::browser::run(&dir, &env, json),
        Commands::Finish {
            env,
            pull_request,
            squash,
        } => commands::finish::run(
            &dir,
            &env,
            FinishOptions {
                pull_request,
                squash,
            },
            json,
        ),
        Commands::Ls => commands::list::run(&dir, json),
        Commands::Migrate { env, action } => {
            let action = match action {
                MigrateCommand::Run => sprig_core::MigrateAction::Run,
                MigrateCommand::Add { name } => sprig_core::MigrateAction::Add(name),
                MigrateCommand::Remove => sprig_core::MigrateAction::Remove,
                MigrateCommand::List => sprig_core::MigrateAction::List,
            };
            commands::migrate::run(&dir, &env, &action, json)
        }
        Commands::Doctor => commands::doctor::run(&dir, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if is_configuration_message(&msg) {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
