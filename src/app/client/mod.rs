//! Transfer clients
//!
//! A transfer client fetches byte ranges of one [`Source`]. The protocol set
//! is closed: the [`ProtocolClientFactory`] dispatches on the source's
//! protocol tag, HTTP is implemented and FTP is reserved.
//!
//! The module is organized into:
//! - `config`: HTTP connection pool configuration and building
//! - `http`: range requests, redirect following and length queries
//!
//! Cancellation is cooperative. Every client carries a cancellation token;
//! reads race against it, so cancelling unblocks a pending read at once.
//! Checks between reads happen at buffer granularity.
//!
//! # Examples
//!
//! ```rust,no_run
//! use blockfetch::app::client::{ClientFactory, ProtocolClientFactory};
//! use blockfetch::app::source::Source;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Source::http("https://example.com/big.iso")?;
//! let factory = ProtocolClientFactory::default();
//! let mut client = factory.create(&source, CancellationToken::new())?;
//!
//! let length = client.query_length(&source).await?;
//! client.connect(&source, 0, Some(length - 1)).await?;
//! let mut stream = client.stream()?;
//! let mut buf = vec![0u8; 8192];
//! while stream.read(&mut buf).await? > 0 {}
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::app::source::{Protocol, Source};
use crate::errors::{DownloadError, DownloadResult};

pub mod config;
pub mod http;

pub use config::ClientConfig;
pub use http::HttpClient;

/// Capabilities every protocol client offers
#[async_trait]
pub trait TransferClient: Send {
    /// Total length of the remote content, following redirects
    async fn query_length(&mut self, source: &Source) -> DownloadResult<u64>;

    /// Open a connection for bytes `start..=end`, or to the end when `end` is None
    async fn connect(&mut self, source: &Source, start: u64, end: Option<u64>)
        -> DownloadResult<()>;

    /// Take the body of the last connection
    fn stream(&mut self) -> DownloadResult<ByteStream>;

    /// Whether the server honoured the last range request
    fn is_resume_supported(&self) -> bool;

    /// Abort any pending or future read; safe to call at any time
    fn cancel(&self);

    /// Release the connection
    async fn close(&mut self);
}

/// Creates transfer clients for sources
pub trait ClientFactory: Send + Sync + std::fmt::Debug {
    fn create(
        &self,
        source: &Source,
        cancel: CancellationToken,
    ) -> DownloadResult<Box<dyn TransferClient>>;
}

/// Factory dispatching on the source's protocol tag
#[derive(Debug, Default)]
pub struct ProtocolClientFactory {
    config: ClientConfig,
    clients: Mutex<HashMap<Duration, reqwest::Client>>,
}

impl ProtocolClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn http_client(&self, connect_timeout: Duration) -> DownloadResult<reqwest::Client> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }
        let client = self.config.build_http_client(connect_timeout)?;
        clients.insert(connect_timeout, client.clone());
        Ok(client)
    }
}

impl ClientFactory for ProtocolClientFactory {
    fn create(
        &self,
        source: &Source,
        cancel: CancellationToken,
    ) -> DownloadResult<Box<dyn TransferClient>> {
        match source.protocol() {
            Protocol::Http(params) => {
                let client = self.http_client(params.connect_timeout)?;
                Ok(Box::new(HttpClient::new(
                    client,
                    params,
                    self.config.max_redirects,
                    cancel,
                )))
            }
            Protocol::Ftp(_) => Err(DownloadError::UnsupportedProtocol {
                scheme: source.url().scheme().to_string(),
            }),
        }
    }
}

/// Readable body of a connection
///
/// Each read races the cancellation token and, when configured, a read
/// timeout.
pub struct ByteStream {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    cancel: CancellationToken,
    read_timeout: Option<Duration>,
}

impl ByteStream {
    pub fn new<R>(reader: R, cancel: CancellationToken, read_timeout: Option<Duration>) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            reader: Box::pin(reader),
            cancel,
            read_timeout,
        }
    }

    /// Wrap a stream of chunks
    pub fn from_chunks<S>(chunks: S, cancel: CancellationToken, read_timeout: Option<Duration>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::new(StreamReader::new(chunks), cancel, read_timeout)
    }

    /// Read into `buf`; zero means end of stream
    pub async fn read(&mut self, buf: &mut [u8]) -> DownloadResult<usize> {
        let Self {
            reader,
            cancel,
            read_timeout,
        } = self;

        if cancel.is_cancelled() {
            return Err(DownloadError::cancelled("read aborted"));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DownloadError::cancelled("read aborted")),
            n = with_timeout(*read_timeout, reader.read(buf)) => n,
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

/// Run `fut` under an optional time limit
pub(crate) async fn with_timeout<F, T, E>(limit: Option<Duration>, fut: F) -> DownloadResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<DownloadError>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(DownloadError::Timeout {
                millis: limit.as_millis() as u64,
            }),
        },
        None => fut.await.map_err(Into::into),
    }
}

/// Zero durations disable a timeout
pub(crate) fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}
