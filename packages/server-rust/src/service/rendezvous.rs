//! One-shot response hand-off between a worker and the caller that submitted a request.
//!
//! A [`Responder`] writes at most one response; a [`ResponseHandle`] reads at
//! most one. The caller can declare it has stopped waiting by cancelling, in
//! which case the worker discards the response instead of delivering it.
//! Delivery never blocks: a worker can always move on to its next request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::operation::{CallError, OperationResponse};

/// Creates a connected responder/handle pair for one request.
#[must_use]
pub fn rendezvous(correlation_id: &str) -> (Responder, ResponseHandle) {
    let (tx, rx) = oneshot::channel();
    let cancel = CancellationToken::new();
    (
        Responder {
            tx,
            cancel: cancel.clone(),
        },
        ResponseHandle {
            correlation_id: correlation_id.to_string(),
            rx,
            cancel,
            resolved: false,
        },
    )
}

/// What happened to a response handed to [`Responder::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The response was written for the caller to read.
    Delivered,
    /// The caller cancelled before delivery; the response was discarded.
    CallerCancelled,
    /// The caller dropped its handle without cancelling; the response was discarded.
    CallerGone,
}

/// Worker-side half of the rendezvous. Consumed by the single delivery.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<OperationResponse>,
    cancel: CancellationToken,
}

impl Responder {
    /// Whether the caller has already given up on this request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Hands `response` to the caller unless it has abandoned the request.
    pub fn deliver(self, response: OperationResponse) -> Delivery {
        if self.cancel.is_cancelled() {
            return Delivery::CallerCancelled;
        }
        match self.tx.send(response) {
            Ok(()) => Delivery::Delivered,
            Err(_unread) => Delivery::CallerGone,
        }
    }
}

/// Caller-side half of the rendezvous.
///
/// Awaiting the handle yields the response, or [`CallError::Abandoned`] if the
/// request was dropped without one. Dropping an unresolved handle cancels the
/// request.
#[derive(Debug)]
pub struct ResponseHandle {
    correlation_id: String,
    rx: oneshot::Receiver<OperationResponse>,
    cancel: CancellationToken,
    resolved: bool,
}

impl ResponseHandle {
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Declares that the caller will not read the response.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits up to `timeout` for the response.
    ///
    /// On deadline the request is cancelled and a `Timeout` response is
    /// returned in its place. The worker may still finish the operation; its
    /// response is then discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Abandoned`] if the request was dropped unanswered.
    pub async fn recv_timeout(mut self, timeout: Duration) -> Result<OperationResponse, CallError> {
        match tokio::time::timeout(timeout, &mut self).await {
            Ok(result) => result,
            Err(_elapsed) => {
                self.cancel();
                Ok(OperationResponse::timeout(
                    self.correlation_id.clone(),
                    timeout.as_millis(),
                ))
            }
        }
    }
}

impl Future for ResponseHandle {
    type Output = Result<OperationResponse, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(response)) => {
                this.resolved = true;
                Poll::Ready(Ok(response))
            }
            Poll::Ready(Err(_closed)) => {
                this.resolved = true;
                Poll::Ready(Err(CallError::Abandoned {
                    correlation_id: this.correlation_id.clone(),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if !self.resolved {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::operation::{OperationResult, ResponseStatus};

    #[tokio::test]
    async fn delivers_exactly_one_response() {
        let (responder, handle) = rendezvous("c1");
        let outcome = responder.deliver(OperationResponse::ok("c1", OperationResult::Written(3)));
        assert_eq!(outcome, Delivery::Delivered);

        let resp = handle.await.unwrap();
        assert_eq!(resp.result, OperationResult::Written(3));
    }

    #[tokio::test]
    async fn cancelled_caller_discards_response() {
        let (responder, handle) = rendezvous("c1");
        handle.cancel();
        assert!(responder.is_cancelled());

        let outcome = responder.deliver(OperationResponse::ok("c1", OperationResult::None));
        assert_eq!(outcome, Delivery::CallerCancelled);
    }

    #[tokio::test]
    async fn dropped_handle_counts_as_cancelled() {
        let (responder, handle) = rendezvous("c1");
        drop(handle);
        assert!(responder.is_cancelled());
        assert_eq!(
            responder.deliver(OperationResponse::ok("c1", OperationResult::None)),
            Delivery::CallerCancelled
        );
    }

    #[tokio::test]
    async fn dropped_responder_abandons_caller() {
        let (responder, handle) = rendezvous("c9");
        drop(responder);
        let err = handle.await.unwrap_err();
        assert_eq!(
            err,
            CallError::Abandoned {
                correlation_id: "c9".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recv_timeout_cancels_on_deadline() {
        let (responder, handle) = rendezvous("c1");
        let resp = handle.recv_timeout(Duration::from_millis(5)).await.unwrap();
        assert_eq!(resp.status, ResponseStatus::Timeout);
        assert_eq!(resp.correlation_id, "c1");
        assert!(responder.is_cancelled());
    }

    #[tokio::test]
    async fn recv_timeout_returns_prompt_response() {
        let (responder, handle) = rendezvous("c1");
        responder.deliver(OperationResponse::denied("c1", "nope"));
        let resp = handle.recv_timeout(Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp.status, ResponseStatus::Denied);
    }
}
