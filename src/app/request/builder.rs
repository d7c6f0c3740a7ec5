//! Builder for download requests

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::core::DownloadRequest;
use super::types::Priority;
use crate::app::events::EventSender;
use crate::app::source::{HttpParameters, Protocol, Source};
use crate::constants::{files, limits};
use crate::errors::{DownloadError, DownloadResult};

/// Builder for [`DownloadRequest`]
///
/// Source errors are collected and reported by [`build`](Self::build) so
/// the setters can be chained.
#[derive(Debug)]
pub struct DownloadRequestBuilder {
    id: u64,
    sources: Vec<Source>,
    source_error: Option<DownloadError>,
    directory: Option<PathBuf>,
    file_name: Option<String>,
    priority: Priority,
    max_retry_times: u32,
    http_defaults: HttpParameters,
    events: Option<EventSender>,
}

impl DownloadRequestBuilder {
    /// Create a builder for a request with the given id
    pub fn new(id: u64) -> Self {
        Self {
            id,
            sources: Vec::new(),
            source_error: None,
            directory: None,
            file_name: None,
            priority: Priority::default(),
            max_retry_times: limits::MAX_RETRIES,
            http_defaults: HttpParameters::default(),
            events: None,
        }
    }

    fn push_source(mut self, source: DownloadResult<Source>) -> Self {
        match source {
            Ok(source) => self.sources.push(source),
            Err(e) => {
                self.source_error.get_or_insert(e);
            }
        }
        self
    }

    /// Timeouts applied to mirrors added later with [`http`](Self::http)
    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.http_defaults.connect_timeout = connect;
        self.http_defaults.read_timeout = read;
        self
    }

    /// Add an HTTP(S) mirror with the builder's default timeouts
    pub fn http(self, url: &str) -> Self {
        let source = Source::new(url, Protocol::Http(self.http_defaults.clone()));
        self.push_source(source)
    }

    /// Add an HTTP(S) mirror with explicit timeouts
    pub fn http_with_timeouts(self, url: &str, connect: Duration, read: Duration) -> Self {
        let source = Source::new(
            url,
            Protocol::Http(HttpParameters {
                connect_timeout: connect,
                read_timeout: read,
                headers: Vec::new(),
            }),
        );
        self.push_source(source)
    }

    /// Add a header to the most recently added HTTP source
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let Some(Protocol::Http(params)) = self.sources.last_mut().map(Source::protocol_mut) {
            params.headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    /// Add an FTP mirror
    pub fn ftp(self, url: &str, username: &str, password: &str) -> Self {
        let source = Source::ftp(url, Some(username.to_string()), Some(password.to_string()));
        self.push_source(source)
    }

    /// Add a prebuilt source
    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Directory the file is written to
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }

    /// File name inside the directory; defaults to the last URL segment
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Retry budget per block for transport faults
    pub fn max_retry_times(mut self, retries: u32) -> Self {
        self.max_retry_times = retries;
        self
    }

    /// Channel receiving this request's events
    pub fn events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self
    }

    /// Build and validate the request
    pub fn build(self) -> DownloadResult<Arc<DownloadRequest>> {
        if let Some(e) = self.source_error {
            return Err(e);
        }
        if self.sources.is_empty() {
            return Err(DownloadError::InvalidRequest {
                reason: "at least one source is required".to_string(),
            });
        }

        let file_name = match self.file_name {
            Some(name) => name,
            None => file_name_from_url(&self.sources[0]).ok_or_else(|| {
                DownloadError::InvalidRequest {
                    reason: format!("cannot derive a file name from {}", self.sources[0]),
                }
            })?,
        };
        if file_name.trim().is_empty() || file_name.contains(['/', '\\']) {
            return Err(DownloadError::InvalidRequest {
                reason: format!("invalid file name '{}'", file_name),
            });
        }

        let directory = self.directory.unwrap_or_else(|| PathBuf::from("."));
        let destination = directory.join(&file_name);
        let temp_path = directory.join(format!("{}{}", file_name, files::TEMP_FILE_SUFFIX));

        Ok(Arc::new(DownloadRequest::new(
            self.id,
            self.sources,
            destination,
            temp_path,
            self.priority,
            self.max_retry_times,
            self.events,
        )))
    }
}

fn file_name_from_url(source: &Source) -> Option<String> {
    source
        .url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
