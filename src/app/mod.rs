//! Core download engine for blockfetch
//!
//! This module contains the engine components: sources and protocol clients,
//! request and block state, the persistence trait, the dispatcher with its
//! two worker pools and the tasks they run.
//!
//! # Examples
//!
//! ```rust,no_run
//! use blockfetch::app::{event_channel, DownloadEvent, Downloader, JsonFileStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = JsonFileStore::open("downloads.json").await?;
//! let downloader = Downloader::builder().store(Arc::new(store)).build()?;
//!
//! let (tx, mut rx) = event_channel();
//! let request = downloader
//!     .request()
//!     .http("https://example.com/big.iso")
//!     .directory("/tmp/downloads")
//!     .events(tx)
//!     .build()?;
//! downloader.start(&request)?;
//!
//! while let Some(event) = rx.recv().await {
//!     if let DownloadEvent::Progress { downloaded, total, .. } = event {
//!         println!("{}/{}", downloaded, total);
//!     } else if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod block;
pub mod client;
pub mod dispatcher;
pub mod downloader;
pub mod events;
pub mod request;
pub mod source;
pub mod store;
pub mod task;

// Re-export main public API
pub use block::FileBlock;
pub use client::{ClientConfig, ClientFactory, ProtocolClientFactory, TransferClient};
pub use dispatcher::{ConfigPresets, DownloaderConfig, DownloaderConfigBuilder};
pub use downloader::{Downloader, DownloaderBuilder};
pub use events::{event_channel, DownloadEvent, EventReceiver, EventSender};
pub use request::{DownloadRequest, DownloadRequestBuilder, Priority, RequestKey, RequestState};
pub use source::{Protocol, Source};
pub use store::{DownloadStore, JsonFileStore, MemoryStore, NoStore, PersistedRequest};
