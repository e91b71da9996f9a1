// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Outbound remote operation with classified-error retry.
//!
//! A [`RetryingRequest`] wraps one logical remote operation. Each attempt is
//! executed by the injected [`Transport`]; transient failures (5xx, 408, or
//! I/O errors with no response) are retried with exponential backoff, and
//! the user completion fires exactly once with the final outcome.
//!
//! # Lifecycle
//!
//! ```text
//! submit() ──▶ attempt ──▶ ok ──────────────────────▶ terminal (success)
//!                 │
//!                 ├─ permanent error ───────────────▶ terminal (error)
//!                 ├─ transient, retries exhausted ──▶ terminal (last error)
//!                 ├─ transient, transport shut down ▶ terminal (last error)
//!                 └─ transient ──▶ backoff timer ──▶ submit()
//! ```
//!
//! Backoff doubles from the configured base: 4s, 8s, 16s with the defaults.
//! [`cancel`](RetryingRequest::cancel) only disarms the backoff timer; an
//! in-flight attempt still delivers its outcome.

use crate::config::RetryConfig;
use crate::error::{DispatchError, Result};
use crate::metrics;
use crate::transport::{
    AttemptOutcome, AttemptRequest, Authenticator, RequestBody, RequestKind, Transport,
};
use http::{header::ACCEPT, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// User completion, invoked exactly once per request lifetime.
pub type CompletionHandler<R> = Box<dyn FnOnce(AttemptOutcome<R>) + Send + 'static>;

/// Hook observing every attempt outcome before the retry decision.
pub type PreCompletionHook<R> = Box<dyn Fn(&AttemptOutcome<R>) + Send + Sync + 'static>;

/// A single-shot remote operation with retry, cancellation, and exactly-once
/// completion.
///
/// Cloning is cheap and shares the same underlying request.
pub struct RetryingRequest<T: Transport> {
    inner: Arc<RequestInner<T>>,
}

impl<T: Transport> Clone for RetryingRequest<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RequestInner<T: Transport> {
    kind: RequestKind,
    transport: Arc<T>,
    method: Method,
    url: Uri,
    headers: HeaderMap,
    body: RequestBody,
    retry: RetryConfig,
    /// Latches true once a terminal outcome has been delivered.
    completed: AtomicBool,
    suppress_404: AtomicBool,
    state: Mutex<RetryState<T>>,
    /// One entry per submitted attempt still awaiting completion.
    attempts_tx: mpsc::UnboundedSender<JoinHandle<()>>,
    attempts_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<JoinHandle<()>>>,
}

struct RetryState<T: Transport> {
    retry_count: u32,
    last_response: Option<crate::transport::ResponseInfo>,
    last_result: Option<T::Response>,
    last_error: Option<DispatchError>,
    retry_timer: Option<JoinHandle<()>>,
    on_completion: Option<CompletionHandler<T::Response>>,
    pre_completion: Option<PreCompletionHook<T::Response>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    queue: Option<Arc<RequestQueue<T>>>,
}

impl<T: Transport> RetryingRequest<T> {
    /// Create a new retrying request.
    ///
    /// Validates the descriptors up front: the URL must parse, and multipart
    /// uploads require a multipart body with method PUT or POST. Nothing is
    /// submitted until [`submit`](Self::submit).
    pub fn new(
        kind: RequestKind,
        transport: Arc<T>,
        method: Method,
        url: &str,
        body: RequestBody,
        headers: HeaderMap,
        retry: RetryConfig,
        on_completion: CompletionHandler<T::Response>,
    ) -> Result<Self> {
        let url: Uri = url
            .parse()
            .map_err(|e| DispatchError::Protocol(format!("malformed url {url:?}: {e}")))?;
        validate_parameters(kind, &method, &body)?;

        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        debug!(%url, %method, ?kind, "retrying request created");
        Ok(Self {
            inner: Arc::new(RequestInner {
                kind,
                transport,
                method,
                url,
                headers,
                body,
                retry,
                completed: AtomicBool::new(false),
                suppress_404: AtomicBool::new(false),
                state: Mutex::new(RetryState {
                    retry_count: 0,
                    last_response: None,
                    last_result: None,
                    last_error: None,
                    retry_timer: None,
                    on_completion: Some(on_completion),
                    pre_completion: None,
                    authenticator: None,
                    queue: None,
                }),
                attempts_tx,
                attempts_rx: tokio::sync::Mutex::new(attempts_rx),
            }),
        })
    }

    /// Attach an authenticator, applied to every generated attempt.
    pub fn set_authenticator(&self, authenticator: Arc<dyn Authenticator>) {
        self.inner.state.lock().authenticator = Some(authenticator);
    }

    /// Attach a hook observing every attempt outcome before the retry
    /// decision.
    pub fn set_pre_completion(&self, hook: PreCompletionHook<T::Response>) {
        self.inner.state.lock().pre_completion = Some(hook);
    }

    /// Demote not-found logging; useful when polling for a document that
    /// legitimately may not exist yet.
    pub fn set_suppress_404(&self, suppress: bool) {
        self.inner.suppress_404.store(suppress, Ordering::Release);
    }

    /// Attach the owning queue this request removes itself from at terminal
    /// completion. The caller is responsible for adding it to the queue.
    pub fn set_queue(&self, queue: Arc<RequestQueue<T>>) {
        self.inner.state.lock().queue = Some(queue);
    }

    /// Submit the first attempt.
    pub fn submit(&self) {
        self.submit_compressed(false);
    }

    /// Submit the first attempt, optionally asking the transport to compress
    /// the request body.
    pub fn submit_compressed(&self, compressed: bool) {
        Arc::clone(&self.inner).spawn_attempt(compressed);
    }

    /// Cancel any armed retry timer.
    ///
    /// Always returns `false`: an in-flight attempt is never interrupted and
    /// will still deliver the single terminal completion. With no attempt in
    /// flight, no completion will ever fire.
    pub fn cancel(&self, _interrupt: bool) -> bool {
        let timer = self.inner.state.lock().retry_timer.take();
        if let Some(timer) = timer {
            if !timer.is_finished() {
                debug!(url = %self.inner.url, "cancelling armed retry");
                timer.abort();
            }
        }
        false
    }

    /// Whether the terminal completion has been delivered.
    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Retries consumed so far.
    pub fn retry_count(&self) -> u32 {
        self.inner.state.lock().retry_count
    }

    /// Wait until the terminal completion has been delivered or every
    /// attempt slot has been consumed.
    ///
    /// Outcomes surface exclusively through the completion handler; this
    /// only sequences. After [`cancel`](Self::cancel) with no attempt in
    /// flight this waits forever; use
    /// [`wait_timeout`](Self::wait_timeout) when that is a possibility.
    pub async fn wait(&self) {
        let mut rx = self.inner.attempts_rx.lock().await;
        loop {
            // Exhaustion latches `completed` before the final attempt task
            // finishes, so the latch alone bounds the drain loop.
            if self.inner.completed.load(Ordering::Acquire) {
                return;
            }
            if self.inner.transport.is_shutdown() {
                return;
            }
            let Some(handle) = rx.recv().await else {
                return;
            };
            // Attempt tasks deliver their completion before finishing, so
            // the latch is settled once the handle resolves.
            let _ = handle.await;
            if self.inner.completed.load(Ordering::Acquire) {
                return;
            }
        }
    }

    /// [`wait`](Self::wait), bounded. Returns `false` on timeout.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl<T: Transport> RequestInner<T> {
    /// Build and submit one attempt.
    fn spawn_attempt(self: Arc<Self>, compressed: bool) {
        if self.transport.is_shutdown() {
            debug!(url = %self.url, "transport shut down; attempt not submitted");
            return;
        }
        let attempt = self.generate_attempt(compressed);
        let inner = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let outcome = inner.transport.execute(attempt).await;
            inner.on_attempt_complete(outcome);
        });
        let _ = self.attempts_tx.send(handle);
    }

    /// A fresh descriptor per attempt; retries never observe state left
    /// behind by an earlier try.
    fn generate_attempt(&self, compressed: bool) -> AttemptRequest {
        let mut state = self.state.lock();
        state.last_response = None;
        state.last_result = None;
        state.last_error = None;

        let mut headers = self.headers.clone();
        if self.kind == RequestKind::MultipartUpload {
            headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        }
        if let Some(authenticator) = state.authenticator.as_ref() {
            authenticator.authorize(&mut headers);
        }
        AttemptRequest {
            kind: self.kind,
            method: self.method.clone(),
            url: self.url.clone(),
            headers,
            body: self.body.clone(),
            compressed,
            suppress_404: self.suppress_404.load(Ordering::Acquire),
        }
    }

    /// The retry decision. Runs on the attempt task, so at most one instance
    /// is live at a time.
    fn on_attempt_complete(self: Arc<Self>, outcome: AttemptOutcome<T::Response>) {
        debug!(url = %self.url, "inner attempt finished");
        {
            let state = self.state.lock();
            if let Some(hook) = state.pre_completion.as_ref() {
                hook(&outcome);
            }
        }

        if outcome.error.is_none() {
            debug!(url = %self.url, "attempt successful, delivering completion");
            metrics::record_attempt("ok");
            self.complete_terminal(outcome, "success");
            return;
        }

        let status = outcome.response.as_ref().map(|r| r.status);
        if status == Some(StatusCode::NOT_FOUND) && self.suppress_404.load(Ordering::Acquire) {
            debug!(url = %self.url, "attempt failed with 404");
        } else {
            warn!(url = %self.url, ?status, error = ?outcome.error, "attempt failed");
        }
        metrics::record_attempt(if outcome.response.is_some() {
            "http_error"
        } else {
            "io_error"
        });

        if !outcome.is_transient() {
            debug!(url = %self.url, "non-transient error, not retrying");
            self.complete_terminal(outcome, "permanent");
            return;
        }

        if self.state.lock().retry_count >= self.retry.max_retries {
            debug!(url = %self.url, "transient error, retries exhausted");
            self.complete_terminal(outcome, "exhausted");
        } else if self.transport.is_shutdown() {
            error!(url = %self.url, "transport shut down, no more retries");
            self.complete_terminal(outcome, "shutdown");
        } else {
            let (retry, delay) = {
                let mut state = self.state.lock();
                state.last_response = outcome.response;
                state.last_result = outcome.result;
                state.last_error = outcome.error;
                state.retry_count += 1;
                let delay = self.retry.delay_for_attempt(state.retry_count);
                (state.retry_count, delay)
            };
            debug!(url = %self.url, retry, ?delay, "transient error, will retry");
            metrics::record_retry_scheduled(retry, delay);

            let inner = Arc::clone(&self);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.spawn_attempt(false);
            });
            self.state.lock().retry_timer = Some(timer);
        }
    }

    /// Deliver the terminal completion exactly once and go inert.
    fn complete_terminal(self: Arc<Self>, outcome: AttemptOutcome<T::Response>, label: &'static str) {
        if self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        metrics::record_terminal(label);

        let (on_completion, queue) = {
            let mut state = self.state.lock();
            // Drop stored outcome references as soon as the completion is
            // delivered to release memory.
            state.last_response = None;
            state.last_result = None;
            state.last_error = None;
            state.retry_timer = None;
            (state.on_completion.take(), state.queue.take())
        };
        if let Some(on_completion) = on_completion {
            on_completion(outcome);
        }
        if let Some(queue) = queue {
            queue.remove(&self);
        }
    }
}

fn validate_parameters(kind: RequestKind, method: &Method, body: &RequestBody) -> Result<()> {
    if kind == RequestKind::MultipartUpload {
        if !body.is_multipart() {
            return Err(DispatchError::Protocol(
                "body must be a multipart entity for multipart uploads".to_string(),
            ));
        }
        if *method != Method::PUT && *method != Method::POST {
            return Err(DispatchError::Protocol(format!(
                "multipart uploads require PUT or POST, got {method}"
            )));
        }
    }
    Ok(())
}

/// Tracks in-flight requests; each removes itself at terminal completion.
pub struct RequestQueue<T: Transport> {
    entries: Mutex<Vec<RetryingRequest<T>>>,
}

impl<T: Transport> Default for RequestQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> RequestQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Track a request until it completes.
    pub fn add(&self, request: &RetryingRequest<T>) {
        self.entries.lock().push(request.clone());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn remove(&self, inner: &Arc<RequestInner<T>>) {
        self.entries
            .lock()
            .retain(|entry| !Arc::ptr_eq(&entry.inner, inner));
    }
}
