//! Request and response types exchanged between callers, the dispatcher, and workers.

use std::fmt;

use bytes::Bytes;
use vaultgate_core::{FileHandle, OperationKind, OperationPayload};

use super::rendezvous::Responder;

/// One unit of dispatchable work.
///
/// Consumed by exactly one worker. The embedded [`Responder`] is the only way
/// to answer it, and it can be used at most once.
#[derive(Debug)]
pub struct WorkerRequest {
    pub kind: OperationKind,
    /// Opaque per-request token for tracing. Not used for routing.
    pub correlation_id: String,
    pub payload: OperationPayload,
    pub responder: Responder,
}

/// Outcome class of a processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// The operation ran and succeeded.
    Ok,
    /// The authorization gate refused (or failed to evaluate) the request.
    Denied,
    /// The resource provider, or a policy mutation, returned an error.
    ExecutionFailed,
    /// The caller stopped waiting before a response arrived.
    Timeout,
    /// No route is registered for the request's kind.
    Unmatched,
}

impl ResponseStatus {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Denied => "denied",
            Self::ExecutionFailed => "execution_failed",
            Self::Timeout => "timeout",
            Self::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-specific output carried by a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperationResult {
    #[default]
    None,
    /// A file handle from create or open.
    Handle(FileHandle),
    /// Bytes read from a file.
    Content(Bytes),
    /// Number of bytes written.
    Written(usize),
}

/// Response delivered to the caller of a submitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResponse {
    pub correlation_id: String,
    pub status: ResponseStatus,
    /// Human-readable explanation. Empty on success.
    pub detail: String,
    pub result: OperationResult,
}

impl OperationResponse {
    #[must_use]
    pub fn ok(correlation_id: impl Into<String>, result: OperationResult) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: ResponseStatus::Ok,
            detail: String::new(),
            result,
        }
    }

    #[must_use]
    pub fn denied(correlation_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::failure(correlation_id, ResponseStatus::Denied, detail)
    }

    #[must_use]
    pub fn execution_failed(correlation_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::failure(correlation_id, ResponseStatus::ExecutionFailed, detail)
    }

    #[must_use]
    pub fn timeout(correlation_id: impl Into<String>, timeout_ms: u128) -> Self {
        Self::failure(
            correlation_id,
            ResponseStatus::Timeout,
            format!("no response within {timeout_ms}ms"),
        )
    }

    #[must_use]
    pub fn unmatched(correlation_id: impl Into<String>, kind: OperationKind) -> Self {
        Self::failure(
            correlation_id,
            ResponseStatus::Unmatched,
            format!("no route registered for {kind}"),
        )
    }

    fn failure(
        correlation_id: impl Into<String>,
        status: ResponseStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status,
            detail: detail.into(),
            result: OperationResult::None,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Reasons a submission is rejected before it reaches the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The pending queue is full. Retry with backoff.
    #[error("gateway overloaded, try again later")]
    Overloaded,
    /// The manager has begun shutting down.
    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl SubmitError {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overloaded => "overloaded",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

/// Errors from a full submit-and-wait call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    /// The request was accepted but dropped unanswered during shutdown.
    #[error("request {correlation_id} abandoned without a response")]
    Abandoned { correlation_id: String },
}
