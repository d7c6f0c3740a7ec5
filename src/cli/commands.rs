//! Command handlers for the blockfetch CLI
//!
//! Each handler receives the loaded configuration with global overrides
//! applied and drives the engine through [`Downloader`].

use std::sync::Arc;

use indicatif::HumanBytes;
use tracing::{debug, info, warn};

use crate::app::{
    event_channel, DownloadStore, Downloader, JsonFileStore, NoStore, PersistedRequest,
};
use crate::cli::args::{CleanArgs, DownloadArgs, InitArgs};
use crate::cli::progress::{ProgressConfig, ProgressDisplay};
use crate::config::AppConfig;
use crate::constants::workers::SHUTDOWN_GRACE;
use crate::errors::{AppError, Result};

/// Download every URL given on the command line
pub async fn handle_download(args: DownloadArgs, mut config: AppConfig) -> Result<()> {
    args.validate().map_err(AppError::generic)?;
    args.apply(&mut config);

    let store = open_store(&config).await?;
    let downloader = Downloader::builder()
        .config(config.downloader.clone())
        .client_config(config.client.clone())
        .store(store)
        .build()?;

    let (events, mut receiver) = event_channel();
    let mut display = ProgressDisplay::new(ProgressConfig {
        enable_progress_bars: !args.no_progress,
        ..ProgressConfig::default()
    });

    let headers = args.parsed_headers();
    let mut started = 0;
    for url in &args.urls {
        let mut builder = downloader
            .request()
            .http(url)
            .directory(&config.output.directory)
            .priority(args.priority)
            .events(events.clone());
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        for mirror in &args.mirror {
            builder = builder.http(mirror);
            for (name, value) in &headers {
                builder = builder.header(name, value);
            }
        }
        if let Some(name) = &args.name {
            builder = builder.file_name(name);
        }

        let request = builder.build()?;
        if !downloader.start(&request)? {
            warn!("{} is already being downloaded", url);
            continue;
        }

        let name = request
            .destination()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| url.clone());
        info!(
            "Started request {} for {} -> {}",
            request.id(),
            url,
            request.destination().display()
        );
        display.add(request.id(), &name);
        started += 1;
    }
    drop(events);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while display.summary().finished() < started {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => display.handle(&event),
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                println!("Interrupted, saving progress...");
                downloader.cancel_all().await;
            }
        }
    }

    downloader.shutdown(SHUTDOWN_GRACE).await;
    let summary = display.finish();

    if interrupted {
        println!("💾 Progress saved. Run the same command again to resume.");
    }
    if summary.failed > 0 {
        return Err(AppError::generic(format!(
            "{} of {} downloads failed",
            summary.failed, started
        )));
    }
    Ok(())
}

/// Print the downloads the store can resume
pub async fn handle_list(config: AppConfig) -> Result<()> {
    let Some(path) = config.store_path()? else {
        println!("Persistence is disabled, nothing to list.");
        return Ok(());
    };
    let store = JsonFileStore::open(&path).await?;
    let requests = store.get_all_requests().await?;

    if requests.is_empty() {
        println!("No resumable downloads in {}", path.display());
        return Ok(());
    }

    println!("Resumable downloads ({})", path.display());
    println!("{}", "=".repeat(60));
    for request in &requests {
        println!("{}", describe(request));
    }
    Ok(())
}

/// Drop the persisted state of the given URLs
pub async fn handle_clean(args: CleanArgs, config: AppConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let urls: Vec<String> = if args.all {
        store
            .get_all_requests()
            .await?
            .into_iter()
            .filter_map(|r| r.sources.first().map(|s| s.url.clone()))
            .collect()
    } else {
        args.urls.clone()
    };

    let downloader = Downloader::builder()
        .config(config.downloader.clone())
        .store(store)
        .build()?;

    let mut removed = 0;
    for url in &urls {
        if downloader.clean(url).await? {
            println!("🗑️  Removed state for {}", url);
            removed += 1;
        } else {
            println!("Nothing stored for {}", url);
        }
    }
    downloader.shutdown(SHUTDOWN_GRACE).await;

    debug!("Cleaned {} of {} URLs", removed, urls.len());
    Ok(())
}

/// Write a default configuration file
pub async fn handle_init(args: InitArgs) -> Result<()> {
    let path = match args.path {
        Some(path) => path,
        None => AppConfig::default_config_path()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?,
    };

    if tokio::fs::try_exists(&path).await? && !args.force {
        return Err(AppError::generic(format!(
            "{} already exists, use --force to overwrite it",
            path.display()
        )));
    }

    AppConfig::write_default(&path).await?;
    println!("📁 Created configuration file:");
    println!("   {}", path.display());
    Ok(())
}

/// Open the configured store, creating its directory if needed
async fn open_store(config: &AppConfig) -> Result<Arc<dyn DownloadStore>> {
    let Some(path) = config.store_path()? else {
        info!("Persistence disabled, downloads will not resume");
        return Ok(Arc::new(NoStore));
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    debug!("Using store {}", path.display());
    Ok(Arc::new(JsonFileStore::open(path).await?))
}

fn describe(request: &PersistedRequest) -> String {
    let downloaded = request.downloaded_bytes();
    let percent = if request.total_length > 0 {
        downloaded as f64 * 100.0 / request.total_length as f64
    } else {
        0.0
    };
    let url = request
        .sources
        .first()
        .map(|s| s.url.as_str())
        .unwrap_or("-");

    format!(
        "{:>5.1}%  {:>10} / {:<10}  {}\n        {}",
        percent,
        HumanBytes(downloaded).to_string(),
        HumanBytes(request.total_length).to_string(),
        request.destination.display(),
        url
    )
}
