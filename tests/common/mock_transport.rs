//! Mock transport and recording processor for integration tests.
//!
//! The transport replays a scripted sequence of outcomes and records every
//! attempt it executes. The processor records delivered groups with their
//! delivery instants so tests can assert on coalescing windows.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_dispatch::processor::{BatchProcessor, BoxFuture, ProcessError};
use sync_dispatch::transport::{self, AttemptOutcome, AttemptRequest, ResponseInfo, Transport};
use sync_dispatch::DispatchError;
use tokio::time::Instant;

/// One scripted attempt outcome.
#[derive(Clone, Copy)]
pub enum Scripted {
    /// Success with the given status.
    Ok(u16),
    /// HTTP-level failure: response present, error present.
    HttpError(u16),
    /// I/O-level failure: no response at all.
    IoError,
}

/// Transport that replays scripted outcomes in FIFO order.
///
/// Once the script runs dry, every further attempt succeeds with 200.
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    attempts: Mutex<Vec<AttemptRequest>>,
    shutdown: AtomicBool,
}

impl MockTransport {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            attempts: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Attempts executed so far.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Recorded attempt descriptors, in execution order.
    pub fn attempts(&self) -> Vec<AttemptRequest> {
        self.attempts.lock().clone()
    }

    pub fn shut_down(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    type Response = serde_json::Value;

    fn execute(
        &self,
        attempt: AttemptRequest,
    ) -> transport::BoxFuture<'_, AttemptOutcome<Self::Response>> {
        self.attempts.lock().push(attempt);
        let next = self.script.lock().pop_front().unwrap_or(Scripted::Ok(200));
        Box::pin(async move {
            match next {
                Scripted::Ok(code) => AttemptOutcome::success(
                    ResponseInfo::new(code.try_into().unwrap()),
                    serde_json::json!({"ok": true}),
                ),
                Scripted::HttpError(code) => {
                    let status = code.try_into().unwrap();
                    AttemptOutcome::failure(
                        Some(ResponseInfo::new(status)),
                        DispatchError::status(status),
                    )
                }
                Scripted::IoError => AttemptOutcome::failure(
                    None,
                    DispatchError::network_msg("connect", "connection reset by peer"),
                ),
            }
        })
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Processor that records every delivered group and when it arrived.
pub struct RecordingProcessor {
    groups: Mutex<Vec<(Instant, Vec<u32>)>>,
    /// Simulated per-group processing time.
    busy_for: Mutex<Duration>,
    calls: AtomicUsize,
}

impl RecordingProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            groups: Mutex::new(Vec::new()),
            busy_for: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_busy_for(&self, busy: Duration) {
        *self.busy_for.lock() = busy;
    }

    /// Delivered groups in delivery order.
    pub fn groups(&self) -> Vec<Vec<u32>> {
        self.groups.lock().iter().map(|(_, g)| g.clone()).collect()
    }

    /// Instants at which each group was delivered.
    pub fn delivered_at(&self) -> Vec<Instant> {
        self.groups.lock().iter().map(|(at, _)| *at).collect()
    }

    /// All delivered items, concatenated in delivery order.
    pub fn delivered(&self) -> Vec<u32> {
        self.groups
            .lock()
            .iter()
            .flat_map(|(_, g)| g.iter().copied())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BatchProcessor<u32> for RecordingProcessor {
    fn process(&self, group: Vec<u32>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let arrived = Instant::now();
            self.calls.fetch_add(1, Ordering::SeqCst);
            let busy = *self.busy_for.lock();
            if !busy.is_zero() {
                tokio::time::sleep(busy).await;
            }
            if group.is_empty() {
                return Err(ProcessError("delivered an empty group".to_string()));
            }
            self.groups.lock().push((arrived, group));
            Ok(())
        })
    }
}
