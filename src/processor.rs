// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batch processor trait.
//!
//! Defines the interface the batcher delivers groups through. The replicator
//! provides an implementation (e.g. a bulk-document push); the batcher never
//! looks inside a group.
//!
//! # Example
//!
//! ```rust
//! use sync_dispatch::processor::{BatchProcessor, BoxFuture};
//!
//! struct Printer;
//!
//! impl BatchProcessor<String> for Printer {
//!     fn process(&self, group: Vec<String>) -> BoxFuture<'_, ()> {
//!         Box::pin(async move {
//!             for doc in group {
//!                 println!("{doc}");
//!             }
//!             Ok(())
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

/// Result type for processor invocations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = ProcessResult<T>> + Send + 'a>>;

/// Simplified error for processor failures.
///
/// The batcher does not classify these; a failed group is logged and dropped,
/// never re-enqueued.
#[derive(Debug, Clone)]
pub struct ProcessError(pub String);

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ProcessError {}

/// Trait defining what the batcher needs from its consumer.
///
/// `process` receives an ordered, non-empty group of at most `capacity`
/// items. Invocations are strictly sequential: the next group is not
/// delivered until the previous call has returned.
pub trait BatchProcessor<T>: Send + Sync + 'static {
    /// Consume one delivered group.
    fn process(&self, group: Vec<T>) -> BoxFuture<'_, ()>;
}

/// A no-op implementation for testing/standalone mode.
///
/// Logs group sizes but doesn't actually push anything.
#[derive(Clone)]
pub struct NoOpProcessor;

impl<T: Send + 'static> BatchProcessor<T> for NoOpProcessor {
    fn process(&self, group: Vec<T>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::debug!(group_size = group.len(), "NoOp: would process group");
            Ok(())
        })
    }
}
