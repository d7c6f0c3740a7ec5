//! Error types for blockfetch
//!
//! This module defines the error types for every component of the engine.
//! `DownloadError` carries the download taxonomy (request, response, redirect
//! limit, cancellation, transport and completion-mismatch faults); the
//! classification drives the block retry policy, so every variant maps onto
//! exactly one [`ErrorKind`].

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`DownloadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller error or violated precondition
    Request,
    /// Server answered with something unusable
    Response,
    /// Too many redirect hops
    RedirectLimit,
    /// Cooperative cancellation observed
    Cancelled,
    /// Network or disk I/O fault, the only retryable kind
    Transport,
    /// Stream ended cleanly but short of the block size
    CompletionMismatch,
    /// Persistence backend failure
    Store,
}

/// Download, transfer and scheduling errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Destination already exists and is never overwritten
    #[error("Destination already exists: {path}")]
    DestinationExists { path: PathBuf },

    /// Byte range with end before start
    #[error("Invalid byte range: {start}-{end}")]
    InvalidRange { start: u64, end: u64 },

    /// Request could not be built or submitted
    #[error("Invalid download request: {reason}")]
    InvalidRequest { reason: String },

    /// Invalid URL provided
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Source protocol has no transfer client
    #[error("Unsupported protocol: {scheme}")]
    UnsupportedProtocol { scheme: String },

    /// Task queue is full
    #[error("Task queue overflow. Queue capacity: {capacity}")]
    QueueOverflow { capacity: usize },

    /// Dispatcher no longer accepts work
    #[error("Downloader is shutting down")]
    ShuttingDown,

    /// Server returned error status
    #[error("Server error: HTTP {status} from {url}")]
    ServerError { status: u16, url: String },

    /// Content length absent, unparseable or not positive
    #[error("Invalid content length from {url}: {value}")]
    InvalidLength { url: String, value: String },

    /// Redirect response without a usable Location header
    #[error("Redirect from {url} has no usable Location header")]
    MissingRedirectLocation { url: String },

    /// Server ignored a range request for a resumed block
    #[error("Server at {url} ignored range request starting at byte {offset}")]
    RangeIgnored { url: String, offset: u64 },

    /// Redirect chain longer than allowed
    #[error("Too many redirects (max {max}) starting from {url}")]
    RedirectLimit { max: usize, url: String },

    /// Cooperative cancellation
    #[error("Cancelled: {context}")]
    Cancelled { context: String },

    /// HTTP transport error
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// I/O error during network reads or file operations
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Connect or read timeout
    #[error("Operation timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// Stream ended before the block was complete
    #[error("Incomplete block {index}: received {received} bytes, expected {expected} bytes")]
    IncompleteBlock {
        index: u32,
        received: u64,
        expected: u64,
    },

    /// Atomic file operation failed
    #[error("Atomic file operation failed: could not rename {temp_path} to {final_path}")]
    AtomicOperationFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
    },

    /// Persistence backend failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DownloadError {
    /// Build a cancellation signal with some context for the logs
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::DestinationExists { .. }
            | DownloadError::InvalidRange { .. }
            | DownloadError::InvalidRequest { .. }
            | DownloadError::InvalidUrl { .. }
            | DownloadError::UnsupportedProtocol { .. }
            | DownloadError::QueueOverflow { .. }
            | DownloadError::ShuttingDown
            | DownloadError::AtomicOperationFailed { .. } => ErrorKind::Request,

            DownloadError::ServerError { .. }
            | DownloadError::InvalidLength { .. }
            | DownloadError::MissingRedirectLocation { .. }
            | DownloadError::RangeIgnored { .. } => ErrorKind::Response,

            DownloadError::RedirectLimit { .. } => ErrorKind::RedirectLimit,
            DownloadError::Cancelled { .. } => ErrorKind::Cancelled,

            DownloadError::Http(e) if e.is_builder() => ErrorKind::Request,
            DownloadError::Http(_) | DownloadError::Io(_) | DownloadError::Timeout { .. } => {
                ErrorKind::Transport
            }

            DownloadError::IncompleteBlock { .. } => ErrorKind::CompletionMismatch,
            DownloadError::Store(_) => ErrorKind::Store,
        }
    }

    /// Only transport faults are worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Check whether this is a cancellation signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

/// Persistence store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error reading or writing the store file
    #[error("Store I/O error")]
    Io(#[from] std::io::Error),

    /// Store document could not be (de)serialized
    #[error("Store serialization error")]
    Json(#[from] serde_json::Error),

    /// Atomic replace of the store file failed
    #[error("Could not persist store file {path}")]
    Persist { path: PathBuf },

    /// Backend-specific failure
    #[error("Store backend error: {message}")]
    Backend { message: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be rendered
    #[error("Could not serialize configuration")]
    Serialize(#[from] toml::ser::Error),

    /// I/O error reading the configuration file
    #[error("Configuration I/O error")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: &str,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Download(e) => e.is_retryable(),
            AppError::Store(StoreError::Io(_)) | AppError::Io(_) => true,
            _ => false,
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Download(e) => match e.kind() {
                ErrorKind::Request => "request",
                ErrorKind::Response => "response",
                ErrorKind::RedirectLimit => "redirect",
                ErrorKind::Cancelled => "cancelled",
                ErrorKind::Transport => "transport",
                ErrorKind::CompletionMismatch => "completion",
                ErrorKind::Store => "storage",
            },
            AppError::Store(_) => "storage",
            AppError::Config(_) => "configuration",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for download operations
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for application-level operations
pub type Result<T> = std::result::Result<T, AppError>;
