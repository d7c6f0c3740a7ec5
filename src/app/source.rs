//! Remote sources and their protocol parameters
//!
//! A [`Source`] pairs a URL with the parameters of the protocol used to fetch
//! it. Sources compare and hash by URL only. The only mutable part is the
//! redirect cache: once a transfer client has followed a redirect for a
//! source, later calls go straight to the final location. Cloning a source
//! copies the cached value rather than sharing it, so every block owns its
//! own redirect state.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::http;
use crate::errors::{DownloadError, DownloadResult};

/// Protocol tag used for dispatch and persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Http,
    Ftp,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Http => write!(f, "http"),
            ProtocolKind::Ftp => write!(f, "ftp"),
        }
    }
}

/// HTTP-specific parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpParameters {
    /// Connection establishment timeout, zero disables it
    pub connect_timeout: Duration,
    /// Per-read timeout, zero disables it
    pub read_timeout: Duration,
    /// Extra request headers, names may repeat
    pub headers: Vec<(String, String)>,
}

impl Default for HttpParameters {
    fn default() -> Self {
        Self {
            connect_timeout: http::CONNECT_TIMEOUT,
            read_timeout: http::READ_TIMEOUT,
            headers: Vec::new(),
        }
    }
}

/// FTP parameters. No FTP transfer client exists yet.
#[derive(Clone, PartialEq, Eq)]
pub struct FtpParameters {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for FtpParameters {
    fn default() -> Self {
        Self {
            connect_timeout: http::CONNECT_TIMEOUT,
            read_timeout: http::READ_TIMEOUT,
            username: None,
            password: None,
        }
    }
}

impl fmt::Debug for FtpParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtpParameters")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Protocol variant with its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocol {
    Http(HttpParameters),
    Ftp(FtpParameters),
}

impl Protocol {
    /// Tag for this variant
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Protocol::Http(_) => ProtocolKind::Http,
            Protocol::Ftp(_) => ProtocolKind::Ftp,
        }
    }

    /// Connect and read timeouts of this variant
    pub fn timeouts(&self) -> (Duration, Duration) {
        match self {
            Protocol::Http(p) => (p.connect_timeout, p.read_timeout),
            Protocol::Ftp(p) => (p.connect_timeout, p.read_timeout),
        }
    }
}

/// Last redirect target seen for a source
#[derive(Debug, Default)]
struct RedirectCache(RwLock<Option<Url>>);

impl RedirectCache {
    fn get(&self) -> Option<Url> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, url: Option<Url>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = url;
    }
}

impl Clone for RedirectCache {
    fn clone(&self) -> Self {
        Self(RwLock::new(self.get()))
    }
}

/// A URL plus the protocol parameters used to fetch it
#[derive(Debug, Clone)]
pub struct Source {
    url: Url,
    protocol: Protocol,
    redirect: RedirectCache,
}

impl Source {
    /// Create a source, checking that the URL scheme fits the protocol
    pub fn new(url: &str, protocol: Protocol) -> DownloadResult<Self> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::InvalidUrl {
            url: url.to_string(),
            error: e.to_string(),
        })?;

        let scheme_ok = match protocol.kind() {
            ProtocolKind::Http => matches!(parsed.scheme(), "http" | "https"),
            ProtocolKind::Ftp => parsed.scheme() == "ftp",
        };
        if !scheme_ok {
            return Err(DownloadError::UnsupportedProtocol {
                scheme: parsed.scheme().to_string(),
            });
        }

        Ok(Self {
            url: parsed,
            protocol,
            redirect: RedirectCache::default(),
        })
    }

    /// HTTP(S) source with default timeouts
    pub fn http(url: &str) -> DownloadResult<Self> {
        Self::new(url, Protocol::Http(HttpParameters::default()))
    }

    /// FTP source. Accepted for requests but has no transfer client.
    pub fn ftp(url: &str, username: Option<String>, password: Option<String>) -> DownloadResult<Self> {
        Self::new(
            url,
            Protocol::Ftp(FtpParameters {
                username,
                password,
                ..FtpParameters::default()
            }),
        )
    }

    /// Infer the protocol from the URL scheme using default parameters
    pub fn parse(url: &str) -> DownloadResult<Self> {
        let scheme = url.split_once("://").map(|(s, _)| s.to_ascii_lowercase());
        match scheme.as_deref() {
            Some("ftp") => Self::ftp(url, None, None),
            _ => Self::http(url),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut Protocol {
        &mut self.protocol
    }

    /// URL to contact: the cached redirect target if any, else the original
    pub fn effective_url(&self) -> Url {
        self.redirect.get().unwrap_or_else(|| self.url.clone())
    }

    pub fn redirect_url(&self) -> Option<Url> {
        self.redirect.get()
    }

    pub(crate) fn cache_redirect(&self, target: Url) {
        self.redirect.set(Some(target));
    }

    pub(crate) fn clear_redirect(&self) {
        self.redirect.set(None);
    }
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Source {}

impl Hash for Source {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
