//! Request state, priority and identity types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::app::source::Source;

/// Lifecycle of a download request
///
/// `NEW → PREPARE_QUEUED → PREPARING → DOWNLOAD_QUEUED → DOWNLOADING →
/// COMPLETED | FAILED`, with `CANCELLED` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    New,
    PrepareQueued,
    Preparing,
    DownloadQueued,
    Downloading,
    Completed,
    Cancelled,
    Failed,
}

impl RequestState {
    /// Check whether no further transitions can happen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Cancelled | RequestState::Failed
        )
    }

    /// Check whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;

        if self.is_terminal() {
            return false;
        }
        match next {
            Cancelled | Failed => true,
            PrepareQueued => self == New,
            Preparing => self == PrepareQueued,
            DownloadQueued => self == Preparing,
            Downloading => self == DownloadQueued,
            // inherited plans can be complete before any block runs
            Completed => matches!(self, Preparing | DownloadQueued | Downloading),
            New => false,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::New => "NEW",
            RequestState::PrepareQueued => "PREPARE_QUEUED",
            RequestState::Preparing => "PREPARING",
            RequestState::DownloadQueued => "DOWNLOAD_QUEUED",
            RequestState::Downloading => "DOWNLOADING",
            RequestState::Completed => "COMPLETED",
            RequestState::Cancelled => "CANCELLED",
            RequestState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Scheduling priority, higher runs first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" | "1" => Ok(Priority::Low),
            "medium" | "2" => Ok(Priority::Medium),
            "high" | "3" => Ok(Priority::High),
            other => Err(format!(
                "unknown priority '{}', expected low, medium or high",
                other
            )),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Identity of a logical download: its sorted, de-duplicated source URLs
///
/// Computed once when the request is built. Two requests with the same URL
/// set are the same download regardless of priority or destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    canonical: String,
    urls: Vec<String>,
}

impl RequestKey {
    pub fn from_sources(sources: &[Source]) -> Self {
        Self::from_urls(sources.iter().map(|s| s.url().to_string()))
    }

    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut urls: Vec<String> = urls.into_iter().map(Into::into).collect();
        urls.sort();
        urls.dedup();
        Self {
            canonical: urls.join("\n"),
            urls,
        }
    }

    /// Canonical string form used for equality
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Check URL membership
    pub fn contains(&self, url: &str) -> bool {
        self.urls.binary_search_by(|u| u.as_str().cmp(url)).is_ok()
    }

    /// Check whether two keys share at least one URL
    pub fn overlaps(&self, other: &RequestKey) -> bool {
        self.urls.iter().any(|u| other.contains(u))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.urls.join(", "))
    }
}
