//! Aider Supervisor - keeps an interactive aider session alive and scriptable.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

use aider_supervisor::config::ConfigLoader;
use aider_supervisor::service::{serve, AssistantService, LogFilterHandle, LogLevel};

#[derive(Parser)]
#[command(
    name = "aider-supervisor",
    about = "Supervised, scriptable aider sessions",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file to use instead of the default search paths.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-line requests on stdin, replies on stdout.
    Serve {
        /// Assistant binary to launch.
        #[arg(long)]
        binary: Option<String>,
        /// Working directory for the assistant.
        #[arg(long)]
        cwd: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config,
}

fn init_tracing(level: LogLevel) -> LogFilterHandle {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    handle
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loader = match cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let mut config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Serve { binary, cwd } => {
            if let Some(binary) = binary {
                config.assistant.binary = binary;
            }
            if let Some(cwd) = cwd {
                config.assistant.working_dir = Some(cwd);
            }
            if cli.verbose > 0 || config.log_level.is_none() {
                config.log_level = Some(LogLevel::from_verbosity(cli.verbose).to_string());
            }

            let level = match config.log_level.as_deref().map(str::parse::<LogLevel>) {
                Some(Ok(level)) => level,
                Some(Err(e)) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
                None => LogLevel::Warn,
            };
            let handle = init_tracing(level);

            let service = match AssistantService::new(config, Some(handle)) {
                Ok(service) => service,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid configuration");
                    return ExitCode::FAILURE;
                }
            };

            tracing::info!(
                binary = %service.supervisor().config().assistant.binary,
                "Serving requests on stdin"
            );
            if let Err(e) = serve(service, tokio::io::stdin(), tokio::io::stdout()).await {
                tracing::error!(error = %e, "Request loop failed");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(text) => {
                print!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
    }
}
