//! blockfetch CLI application
//!
//! Command-line interface for resumable multi-connection downloads.

use std::fs::OpenOptions;
use std::process;
use std::sync::Mutex;

use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use blockfetch::cli::{handle_clean, handle_download, handle_init, handle_list, Cli, Commands};
use blockfetch::config::{AppConfig, LoggingConfig};
use blockfetch::errors::Result;

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    // init writes its own file, so it must not depend on a readable config
    if let Commands::Init(args) = &cli.command {
        init_logging(&cli, &LoggingConfig::default());
        return handle_init(args.clone()).await;
    }

    let mut config = AppConfig::load(cli.global.config.clone()).await?;
    cli.apply(&mut config);
    init_logging(&cli, &config.logging);

    info!("blockfetch v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Download(args) => {
            info!("Executing download command");
            handle_download(args, config).await
        }
        Commands::List => handle_list(config).await,
        Commands::Clean(args) => {
            info!("Executing clean command");
            handle_clean(args, config).await
        }
        Commands::Init(_) => Ok(()),
    }
}

/// Initialize logging from the CLI flags, falling back to the configuration
fn init_logging(cli: &Cli, logging: &LoggingConfig) {
    let level = cli
        .log_level()
        .map(|l| l.to_string().to_lowercase())
        .unwrap_or_else(|| logging.level.clone());

    let mut filter = EnvFilter::from_default_env();
    match format!("blockfetch={}", level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(_) => eprintln!("Ignoring invalid log level '{}'", level),
    }

    let log_file = logging.log_file.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("Cannot open log file {}: {}", path.display(), e))
            .ok()
    });

    match log_file {
        Some(file) => fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(cli.global.very_verbose)
            .with_writer(std::io::stderr)
            .init(),
    }

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
    if cli.global.no_store {
        warn!("Persistence disabled, interrupted downloads will restart from zero");
    }
}
