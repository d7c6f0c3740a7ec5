//! blockfetch library
//!
//! A resumable multi-connection download engine. Files are split into
//! blocks fetched concurrently with HTTP range requests, progress is
//! checkpointed per block and an interrupted run resumes where it stopped.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
