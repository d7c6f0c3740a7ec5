//! HTTP transfer client
//!
//! Issues `Range: bytes=<start>-[<end>]` requests and follows redirects by
//! hand, at most `max_redirects` hops per call. The final redirect target is
//! cached on the [`Source`] so later calls skip the chain. A `206 Partial
//! Content` answer marks the source as resume-capable; any other success
//! status means the server ignored the range.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderName, CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::{non_zero, with_timeout, ByteStream, TransferClient};
use crate::app::source::{HttpParameters, Source};
use crate::constants::http::REDIRECT_CODES;
use crate::errors::{DownloadError, DownloadResult};

/// HTTP implementation of [`TransferClient`]
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    headers: Vec<(String, String)>,
    read_timeout: Option<Duration>,
    send_timeout: Option<Duration>,
    max_redirects: usize,
    cancel: CancellationToken,
    response: Option<Response>,
    resume_supported: bool,
}

impl HttpClient {
    pub fn new(
        client: Client,
        params: &HttpParameters,
        max_redirects: usize,
        cancel: CancellationToken,
    ) -> Self {
        let read_timeout = non_zero(params.read_timeout);
        // waiting for response headers covers connecting plus one read
        let send_timeout = read_timeout.map(|r| r + params.connect_timeout);
        Self {
            client,
            headers: params.headers.clone(),
            read_timeout,
            send_timeout,
            max_redirects,
            cancel,
            response: None,
            resume_supported: false,
        }
    }

    /// Send one request, following redirects
    async fn execute(
        &mut self,
        method: Method,
        source: &Source,
        start: u64,
        end: Option<u64>,
    ) -> DownloadResult<Response> {
        let range = range_header(start, end)?;
        let mut url = source.effective_url();
        let mut hops = 0usize;

        loop {
            let request = self
                .client
                .request(method.clone(), url.clone())
                .header(RANGE, range.as_str());
            let response = send(request, &self.headers, &self.cancel, self.send_timeout).await?;
            let status = response.status();

            if REDIRECT_CODES.contains(&status.as_u16()) {
                if hops >= self.max_redirects {
                    return Err(DownloadError::RedirectLimit {
                        max: self.max_redirects,
                        url: source.url().to_string(),
                    });
                }
                let target = redirect_target(&url, &response)?;
                debug!("Redirect {} from {} to {}", status.as_u16(), url, target);
                source.cache_redirect(target.clone());
                url = target;
                hops += 1;
                continue;
            }

            if !status.is_success() {
                return Err(DownloadError::ServerError {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            self.resume_supported = status == StatusCode::PARTIAL_CONTENT;
            return Ok(response);
        }
    }
}

#[async_trait]
impl TransferClient for HttpClient {
    async fn query_length(&mut self, source: &Source) -> DownloadResult<u64> {
        let response = self.execute(Method::HEAD, source, 0, None).await?;
        let length = content_length(&response)?;
        debug!(
            "Length of {} is {} bytes (resume {})",
            source,
            length,
            if self.resume_supported {
                "supported"
            } else {
                "not supported"
            }
        );
        Ok(length)
    }

    async fn connect(
        &mut self,
        source: &Source,
        start: u64,
        end: Option<u64>,
    ) -> DownloadResult<()> {
        self.response = None;
        let response = self.execute(Method::GET, source, start, end).await?;

        // a full body written at a non-zero offset would corrupt the file
        if start > 0 && !self.resume_supported {
            return Err(DownloadError::RangeIgnored {
                url: response.url().to_string(),
                offset: start,
            });
        }

        self.response = Some(response);
        Ok(())
    }

    fn stream(&mut self) -> DownloadResult<ByteStream> {
        let response = self
            .response
            .take()
            .ok_or_else(|| DownloadError::InvalidRequest {
                reason: "stream requested before connect".to_string(),
            })?;

        let chunks = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(ByteStream::from_chunks(
            chunks,
            self.cancel.clone(),
            self.read_timeout,
        ))
    }

    fn is_resume_supported(&self) -> bool {
        self.resume_supported
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn close(&mut self) {
        self.response = None;
    }
}

async fn send(
    mut request: RequestBuilder,
    headers: &[(String, String)],
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> DownloadResult<Response> {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DownloadError::cancelled("request aborted")),
        response = with_timeout(timeout, request.send()) => response,
    }
}

/// `bytes=<start>-[<end>]`
pub fn range_header(start: u64, end: Option<u64>) -> DownloadResult<String> {
    match end {
        Some(end) if end < start => Err(DownloadError::InvalidRange { start, end }),
        Some(end) => Ok(format!("bytes={}-{}", start, end)),
        None => Ok(format!("bytes={}-", start)),
    }
}

fn redirect_target(current: &Url, response: &Response) -> DownloadResult<Url> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|location| current.join(location).ok())
        .ok_or_else(|| DownloadError::MissingRedirectLocation {
            url: current.to_string(),
        })
}

/// Total length from `Content-Range` on 206, else `Content-Length`
fn content_length(response: &Response) -> DownloadResult<u64> {
    let header = |name: HeaderName| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let from_range = if response.status() == StatusCode::PARTIAL_CONTENT {
        header(CONTENT_RANGE).and_then(|v| total_from_content_range(&v))
    } else {
        None
    };

    let raw = match from_range {
        Some(total) => return positive(total, response),
        None => header(CONTENT_LENGTH),
    };

    let value = raw.unwrap_or_else(|| "<absent>".to_string());
    match value.trim().parse::<u64>() {
        Ok(length) => positive(length, response),
        Err(_) => Err(DownloadError::InvalidLength {
            url: response.url().to_string(),
            value,
        }),
    }
}

fn positive(length: u64, response: &Response) -> DownloadResult<u64> {
    if length == 0 {
        return Err(DownloadError::InvalidLength {
            url: response.url().to_string(),
            value: "0".to_string(),
        });
    }
    Ok(length)
}

/// Parse the total out of `bytes <first>-<last>/<total>`
pub fn total_from_content_range(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (_, total) = rest.split_once('/')?;
    total.trim().parse().ok()
}
