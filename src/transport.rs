// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transport trait and attempt descriptors.
//!
//! The dispatch core never touches the wire. A [`Transport`] executes one
//! outbound attempt described by an [`AttemptRequest`] and resolves to the
//! `(response, result, error)` triple in [`AttemptOutcome`]. How bodies are
//! encoded, multipart streams are buffered, and responses are decoded is
//! entirely the transport's business.
//!
//! # Request kinds
//!
//! - [`RequestKind::Simple`] — body is an opaque JSON value the transport
//!   serializes.
//! - [`RequestKind::MultipartUpload`] — body is a pre-built multipart entity;
//!   the transport streams it directly. Method must be PUT or POST and
//!   `Accept: */*` is set on the attempt.
//! - [`RequestKind::MultipartDownload`] — the response is parsed as
//!   multipart; individual parts surface through the transport's own
//!   buffering.

use crate::error::{is_transient_status, DispatchError};
use http::{HeaderMap, Method, StatusCode, Uri};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Selects how the outbound request is built on each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Plain request with an opaque serialized body.
    Simple,
    /// Streaming multipart upload (document + attachments).
    MultipartUpload,
    /// Download with a multipart-parsed response.
    MultipartDownload,
}

/// One part of a pre-built multipart entity.
#[derive(Debug, Clone)]
pub struct BodyPart {
    pub content_type: String,
    pub content: Vec<u8>,
}

/// A pre-built multipart entity, streamed by the transport as-is.
#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    pub parts: Vec<BodyPart>,
}

impl MultipartBody {
    pub fn push(&mut self, content_type: impl Into<String>, content: Vec<u8>) {
        self.parts.push(BodyPart {
            content_type: content_type.into(),
            content,
        });
    }
}

/// Request body, opaque to the core.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartBody),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart(_))
    }
}

/// Everything a transport needs to perform one attempt.
///
/// A fresh descriptor is generated per attempt so retries never observe
/// state left behind by an earlier try.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub kind: RequestKind,
    pub method: Method,
    pub url: Uri,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Opt-in request-body compression.
    pub compressed: bool,
    /// Demote not-found logging for polling paths.
    pub suppress_404: bool,
}

/// Response metadata surfaced alongside the decoded result.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseInfo {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }
}

/// Outcome of one attempt: the `(response, result, error)` triple.
///
/// On success `error` is `None`. On HTTP-level failure the response is still
/// present (its status drives retry classification); on I/O-level failure
/// there is no response at all.
#[derive(Debug)]
pub struct AttemptOutcome<R> {
    pub response: Option<ResponseInfo>,
    pub result: Option<R>,
    pub error: Option<DispatchError>,
}

impl<R> AttemptOutcome<R> {
    /// A successful attempt.
    pub fn success(response: ResponseInfo, result: R) -> Self {
        Self {
            response: Some(response),
            result: Some(result),
            error: None,
        }
    }

    /// A failed attempt, with or without a response.
    pub fn failure(response: Option<ResponseInfo>, error: DispatchError) -> Self {
        Self {
            response,
            result: None,
            error: Some(error),
        }
    }

    /// Classify this outcome for the retry decision.
    ///
    /// Transient iff the response status is retryable, or there is no
    /// response and the error is I/O-level.
    pub fn is_transient(&self) -> bool {
        match (&self.response, &self.error) {
            (Some(response), _) => is_transient_status(response.status),
            (None, Some(error)) => matches!(error, DispatchError::Network { .. }),
            (None, None) => false,
        }
    }
}

/// Trait defining what the retrying request needs from the HTTP layer.
///
/// One call to [`execute`](Self::execute) performs one attempt. The
/// transport also exposes its shutdown state; once shut down, no further
/// retries are scheduled and in-flight outcomes become terminal.
pub trait Transport: Send + Sync + 'static {
    /// Decoded response type (e.g. a parsed JSON document).
    type Response: Send + 'static;

    /// Perform one outbound attempt.
    fn execute(&self, attempt: AttemptRequest) -> BoxFuture<'_, AttemptOutcome<Self::Response>>;

    /// Whether the underlying executor/client has been shut down.
    fn is_shutdown(&self) -> bool {
        false
    }
}

/// Authentication seam, attached to every generated attempt.
///
/// Token formats are out of scope here; implementations inject whatever
/// headers their scheme needs.
pub trait Authenticator: Send + Sync + 'static {
    fn authorize(&self, headers: &mut HeaderMap);
}

/// A no-op transport for testing/standalone mode.
///
/// Resolves every attempt as a `200 OK` with a null result.
#[derive(Clone)]
pub struct NoOpTransport;

impl Transport for NoOpTransport {
    type Response = serde_json::Value;

    fn execute(&self, attempt: AttemptRequest) -> BoxFuture<'_, AttemptOutcome<Self::Response>> {
        Box::pin(async move {
            tracing::debug!(method = %attempt.method, url = %attempt.url, "NoOp: would execute attempt");
            AttemptOutcome::success(ResponseInfo::new(StatusCode::OK), serde_json::Value::Null)
        })
    }
}
