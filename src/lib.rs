//! # Sync Dispatch
//!
//! The concurrent dispatch core of the document replicator: accumulates work
//! items into size- or time-bounded groups, and dispatches outbound remote
//! operations with exponential-backoff retry.
//!
//! ## Architecture
//!
//! Two independent primitives, composed by the replicator:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            sync-dispatch                             │
//! │                                                                      │
//! │  changes ──▶ ┌─────────┐  groups of 1..=capacity  ┌───────────────┐  │
//! │              │ Batcher │ ───────────────────────▶ │ BatchProcessor│  │
//! │              │ (inbox) │   arrival order, FIFO    │ (bulk push)   │  │
//! │              └─────────┘                          └───────────────┘  │
//! │                                                                      │
//! │  operation ─▶ ┌─────────────────┐  one attempt at a time ┌─────────┐ │
//! │               │ RetryingRequest │ ─────────────────────▶ │Transport│ │
//! │               │ (backoff 4/8/16)│ ◀───────────────────── │ (HTTP)  │ │
//! │               └─────────────────┘  (response,result,err) └─────────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The batcher coalesces arrivals for up to `delay`, rushes them through
//! when the inbox hits `capacity` or the system has been idle, and always
//! preserves global arrival order. The retrying request classifies failures
//! (5xx and 408, or I/O errors with no response, are transient), retries
//! with doubling backoff, and delivers its user completion exactly once.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sync_dispatch::{Batcher, BatcherConfig, NoOpProcessor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let batcher = Batcher::new(BatcherConfig::default(), Arc::new(NoOpProcessor));
//!     batcher.enqueue(vec!["doc-1".to_string(), "doc-2".to_string()]);
//!     batcher.wait_until_drained().await;
//! }
//! ```

pub mod batcher;
pub mod config;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod request;
pub mod transport;

// Re-exports for convenience
pub use batcher::Batcher;
pub use config::{BatcherConfig, RetryConfig};
pub use error::{DispatchError, Result};
pub use processor::{BatchProcessor, NoOpProcessor, ProcessError};
pub use request::{CompletionHandler, PreCompletionHook, RequestQueue, RetryingRequest};
pub use transport::{
    AttemptOutcome, AttemptRequest, Authenticator, MultipartBody, NoOpTransport, RequestBody,
    RequestKind, ResponseInfo, Transport,
};
