mod commands;
mod console;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use stackflow_lifecycle::{Direction, LifecycleError};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code for a declined confirmation (same as Ctrl-C)
const EXIT_ABORTED: i32 = 130;
const EXIT_INVALID_INPUT: i32 = 2;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "Update, restore and tear down deployed stacks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// AWS region (falls back to the config file, then the aws CLI default)
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// AWS credential profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Update a stack to a newer release
    Update {
        /// Stack name or id
        #[arg(short, long, env = "STACKFLOW_STACK")]
        stack: Option<String>,
        /// Release to update to (asked interactively when omitted)
        #[arg(short, long)]
        tag: Option<String>,
        /// Skip the transition release check
        #[arg(long)]
        force: bool,
        /// Offer release candidates
        #[arg(long)]
        rc: bool,
        /// Release provider to request the update from
        #[arg(long)]
        provider: Option<String>,
        /// Answer yes to every confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Roll a stack back to a previously applied release
    Rollback {
        /// Stack name or id
        #[arg(short, long, env = "STACKFLOW_STACK")]
        stack: Option<String>,
        /// Release to roll back to (asked interactively when omitted)
        #[arg(short, long)]
        tag: Option<String>,
        /// Answer yes to every confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Restore a stack's tables and buckets as of a point in time
    Restore {
        /// Stack whose resources are restored
        #[arg(long)]
        source: String,
        /// Point in time, RFC 3339 (e.g. 2026-10-01T12:00:00Z)
        #[arg(long, value_parser = commands::restore::parse_point_in_time)]
        date: DateTime<Utc>,
        /// Write the new stack's parameters to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Parameter override for the new stack (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE", value_parser = commands::restore::parse_key_val)]
        params: Vec<(String, String)>,
        /// Create a stack with this name on the restored resources
        #[arg(long, requires = "template_url")]
        launch: Option<String>,
        /// Template for the launched stack
        #[arg(long, requires = "launch")]
        template_url: Option<String>,
        /// Enable termination protection on the launched stack
        #[arg(long, requires = "launch")]
        protect: bool,
        /// Skip the confirmation before creating resources
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete a stack and the resources it would leave behind
    Destroy {
        /// Stack name or id
        #[arg(short, long, env = "STACKFLOW_STACK")]
        stack: Option<String>,
        /// Directory for the bucket deletion script
        #[arg(long)]
        script_dir: Option<PathBuf>,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        std::process::exit(report_error(&e));
    }
}

/// Logs go to stderr so stdout stays readable
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Version needs no config file
    if matches!(cli.command, Commands::Version) {
        println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = stackflow_config::load_settings()?;
    let ctx = commands::Context::new(settings, cli.region, cli.profile);

    match cli.command {
        Commands::Update {
            stack,
            tag,
            force,
            rc,
            provider,
            yes,
        } => {
            let args = commands::update::UpdateArgs {
                stack,
                tag,
                force,
                release_candidates: rc,
                provider,
                yes,
            };
            commands::update::handle(&ctx, Direction::Update, args).await?;
        }
        Commands::Rollback { stack, tag, yes } => {
            let args = commands::update::UpdateArgs {
                stack,
                tag,
                force: false,
                release_candidates: false,
                provider: None,
                yes,
            };
            commands::update::handle(&ctx, Direction::Rollback, args).await?;
        }
        Commands::Restore {
            source,
            date,
            output,
            params,
            launch,
            template_url,
            protect,
            yes,
        } => {
            let args = commands::restore::RestoreArgs {
                source,
                date,
                output,
                params,
                launch,
                template_url,
                protect,
                yes,
            };
            commands::restore::handle(&ctx, args).await?;
        }
        Commands::Destroy { stack, script_dir } => {
            commands::destroy::handle(&ctx, stack, script_dir).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}

/// Print an error the way the operator needs it and pick the exit code
fn report_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<LifecycleError>() {
        Some(LifecycleError::UserAborted) => {
            eprintln!("{}", "Aborted.".yellow());
            EXIT_ABORTED
        }
        Some(LifecycleError::InvalidInput(message)) => {
            eprintln!("{} {}", "Error:".red().bold(), message.red());
            EXIT_INVALID_INPUT
        }
        Some(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(url) = e.console_url() {
                eprintln!("  {} {}", "Console:".bold(), url.cyan());
            }
            1
        }
        None => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            1
        }
    }
}
