//! Application configuration for the blockfetch CLI
//!
//! Configuration is read from a TOML file with one section per concern.
//! Every section and field is optional; missing values take the built-in
//! defaults. Durations use humantime notation such as `8s` or `250ms`.
//!
//! The file is looked up in this order:
//! 1. The path given with `--config`
//! 2. `./blockfetch.toml`
//! 3. `<user config dir>/blockfetch/config.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{ClientConfig, DownloaderConfig};
use crate::constants::{checkpoint, files, http, limits, workers};
use crate::errors::{AppError, ConfigError, Result};

/// Complete CLI configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine settings
    pub downloader: DownloaderConfig,
    /// HTTP connection pool settings
    pub client: ClientConfig,
    /// Persistence settings
    pub store: StoreConfig,
    /// Output location
    pub output: OutputConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Where download progress is persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Disable persistence entirely; nothing resumes across runs
    pub disabled: bool,
    /// JSON store file, the user data directory when unset
    pub path: Option<PathBuf>,
}

/// Default output location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Append logs to this file instead of stderr
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Load configuration, falling back to defaults when no file exists
    ///
    /// An explicitly given file must exist.
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) => {
                if !tokio::fs::try_exists(&path).await? {
                    return Err(ConfigError::NotFound { path }.into());
                }
                Some(path)
            }
            None => Self::find_config_file().await,
        };

        let config = match config_path {
            Some(path) => Self::load_from_file(&path).await?,
            None => Self::default(),
        };

        config.downloader.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    async fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from("./blockfetch.toml")];
        if let Some(path) = Self::default_config_path() {
            search_paths.push(path);
        }

        for path in search_paths {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }

        debug!("No config file found in standard locations");
        None
    }

    /// Default config file path for the current user
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(files::CONFIG_DIR_NAME).join(files::CONFIG_FILE_NAME))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(ConfigError::from)?;
        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::from)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Store file to open, None when persistence is disabled
    pub fn store_path(&self) -> Result<Option<PathBuf>> {
        if self.store.disabled {
            return Ok(None);
        }
        if let Some(path) = &self.store.path {
            return Ok(Some(path.clone()));
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| AppError::generic("Could not determine user data directory"))?;
        Ok(Some(
            data_dir
                .join(files::CONFIG_DIR_NAME)
                .join(files::STORE_FILE_NAME),
        ))
    }

    /// Write a commented default configuration to `path`
    pub async fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, Self::generate_default_config_content()).await?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    /// Generate default configuration content with comments
    pub fn generate_default_config_content() -> String {
        format!(
            r#"# blockfetch configuration
# Every setting is optional. Durations accept values such as "8s" or "250ms".

[downloader]
# Timeouts applied to new HTTP sources, "0s" disables them
connect_timeout = "{connect}"
read_timeout = "{read}"

# Attempts per block after the first failure
max_retry_times = {retries}

# Read and write buffer size in bytes
buffer_size = {buffer}

# Transfer workers, and how many of them stay alive while idle
thread_count = {threads}
core_thread_count = {core}

# Blocks a resumable download is split into
threads_per_request = {per_request}

# Queued tasks per pool, 0 for no limit
max_task_count = {tasks}

# Files smaller than this many bytes are fetched in one block
min_block_size = {min_block}
max_block_count = {max_blocks}

# Idle workers above the core count exit after this long
keep_alive = "{keep_alive}"

# Progress is made durable once both thresholds are passed
checkpoint_bytes = {cp_bytes}
checkpoint_interval = "{cp_interval}"

[client]
tcp_nodelay = true
pool_max_per_host = {pool}
max_redirects = {redirects}

[store]
# Set to true to keep no state between runs
disabled = false
# path = "/path/to/downloads.json"

[output]
directory = "."

[logging]
level = "warn"
# log_file = "/path/to/blockfetch.log"
"#,
            connect = humantime::format_duration(http::CONNECT_TIMEOUT),
            read = humantime::format_duration(http::READ_TIMEOUT),
            retries = limits::MAX_RETRIES,
            buffer = limits::BUFFER_SIZE,
            threads = workers::DEFAULT_THREAD_COUNT,
            core = workers::CORE_TRANSFER_WORKERS,
            per_request = workers::DEFAULT_THREADS_PER_REQUEST,
            tasks = limits::MAX_TASK_COUNT,
            min_block = limits::MIN_BLOCK_SIZE,
            max_blocks = limits::MAX_BLOCK_COUNT,
            keep_alive = humantime::format_duration(workers::KEEP_ALIVE),
            cp_bytes = checkpoint::MIN_BYTES,
            cp_interval = humantime::format_duration(checkpoint::MIN_INTERVAL),
            pool = http::POOL_MAX_PER_HOST,
            redirects = http::MAX_REDIRECTS,
        )
    }
}
