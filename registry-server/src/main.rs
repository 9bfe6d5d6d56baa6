use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use ddo_registry_server::config::{AppConfig, LogFormat};
use ddo_registry_server::error::AppError;
use ddo_registry_server::schema::{SchemaMode, SchemaValidator};
use ddo_registry_server::{server, store};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "registry-server", about = "DDO Registry Server", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a DDO JSON file against the local schema
    Validate {
        /// DDO file to check
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Validate { file }) => match validate_file(&file) {
            Ok(true) => eprintln!("{}: valid", file.display()),
            Ok(false) => std::process::exit(1),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },
        None => run_server(cli.config).await,
    }
}

/// Print every schema issue found in `file`. Returns whether it was valid.
fn validate_file(file: &Path) -> Result<bool, AppError> {
    let contents = std::fs::read_to_string(file)?;
    let document: serde_json::Value = serde_json::from_str(&contents)?;
    let issues = SchemaValidator::new()?.list_errors(SchemaMode::Local, &document);
    for issue in &issues {
        let path = if issue.path.is_empty() {
            "<root>"
        } else {
            issue.path.as_str()
        };
        eprintln!("  {path}: {}", issue.message);
    }
    Ok(issues.is_empty())
}

async fn run_server(config_path: Option<PathBuf>) {
    let config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!();
            eprintln!("Create a config.toml or specify one:");
            eprintln!("  registry-server --config <path>");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    let store = match store::Store::open(&config.store) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("failed to open store: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run(config, store).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match config.log.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}
