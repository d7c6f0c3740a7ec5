//! Download and block request state
//!
//! This module holds the runtime state shared by the dispatcher and its
//! tasks:
//!
//! - [`DownloadRequest`]: one logical download with its state machine,
//!   delivery latch and block plan
//! - [`BlockRequest`]: per-block progress, retry budget and delivery latch
//! - [`DownloadRequestBuilder`]: validated construction
//! - [`RequestKey`]: URL-set identity used for de-duplication
//!
//! # Examples
//!
//! ```rust,no_run
//! use blockfetch::app::request::{DownloadRequestBuilder, Priority};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = DownloadRequestBuilder::new(1)
//!     .http("https://example.com/big.iso")
//!     .http("https://mirror.example.com/big.iso")
//!     .directory("/tmp/downloads")
//!     .priority(Priority::High)
//!     .build()?;
//! assert_eq!(request.sources().len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod builder;
pub mod core;
pub mod types;

pub use block::BlockRequest;
pub use builder::DownloadRequestBuilder;
pub use self::core::DownloadRequest;
pub use types::{Priority, RequestKey, RequestState};

#[cfg(test)]
mod tests;
