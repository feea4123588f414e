use clap::{Args, Parser, Subcommand};
use copilot_audit::cli::run::RunOptions;
use copilot_audit::config::{load_config, resolve_config_path, Config};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE: &str = "AuditScriptLog.txt";
const DEFAULT_LOG_FILTER: &str = "copilot_audit=info";

#[derive(Parser)]
#[command(name = "copilot-audit")]
#[command(about = "Export Microsoft 365 Copilot users and audit events to CSV", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Only export the user roster
    #[arg(long, conflicts_with = "events_only")]
    users_only: bool,

    /// Only sync audit events
    #[arg(long)]
    events_only: bool,

    /// Directory for CSV output and the log file
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunArgs),
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Init {
        #[arg(long)]
        stdout: bool,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; credentials may come from the environment or config
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run(args)) => run(config_path.as_deref(), args).await?,
        None => run(config_path.as_deref(), cli.run).await?,
        Some(Commands::Config { action }) => {
            init_logging(None);
            match action {
                ConfigAction::Init { stdout } => copilot_audit::cli::config::init(stdout)?,
                ConfigAction::Validate => copilot_audit::cli::config::validate(config_path.as_deref())?,
            }
        }
    }

    Ok(())
}

async fn run(config_path: Option<&Path>, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config: Config = load_config(config_path)?;
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }
    std::fs::create_dir_all(&config.output.dir)?;

    init_logging(Some(&config.output.dir));
    if let Some(path) = config_path {
        tracing::info!(config_path = %path.display(), "Loaded configuration");
    }

    let options = RunOptions {
        users_only: args.users_only,
        events_only: args.events_only,
    };
    copilot_audit::cli::run::run(&config, options).await?;
    Ok(())
}

/// Stdout logging, plus a plain-text copy in `log_dir` when given.
fn init_logging(log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let file_layer = log_dir.map(|dir| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(tracing_appender::rolling::never(dir, LOG_FILE))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
}
