//! Pool worker: executes one request at a time, end to end.
//!
//! Each iteration the worker publishes a fresh single-use inbox to the idle
//! set, waits for the dispatcher to fill it (or for shutdown), authorizes the
//! request, runs the routed handler, and hands the response back through the
//! request's rendezvous. Failures of any kind become responses; nothing that
//! happens inside one request ends the worker.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn, Instrument};
use vaultgate_core::{
    Access, AuthorizationGate, OperationKind, OperationPayload, RequestContext, ResourceProvider,
};

use super::operation::{OperationResponse, WorkerRequest};
use super::rendezvous::Delivery;
use super::routes::{Invocation, RouteTable};
use super::shutdown::{ShutdownController, ShutdownSignal};

/// A worker advertising that it can take one request right now.
///
/// The inbox is single-use: publishing it and filling it form one hand-off.
#[derive(Debug)]
pub struct IdleWorker {
    pub worker_id: Arc<str>,
    pub inbox: oneshot::Sender<WorkerRequest>,
}

/// Capabilities and routing shared by every worker in a pool.
#[derive(Clone)]
pub struct WorkerDeps {
    pub gate: Arc<dyn AuthorizationGate>,
    pub provider: Arc<dyn ResourceProvider>,
    pub routes: Arc<RouteTable>,
    pub controller: Arc<ShutdownController>,
}

pub struct Worker {
    id: Arc<str>,
    idle_tx: mpsc::Sender<IdleWorker>,
    shutdown: ShutdownSignal,
    deps: WorkerDeps,
}

impl Worker {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>, idle_tx: mpsc::Sender<IdleWorker>, deps: WorkerDeps) -> Self {
        let shutdown = deps.controller.signal();
        Self {
            id: id.into(),
            idle_tx,
            shutdown,
            deps,
        }
    }

    /// Runs until shutdown is signalled while idle, or the dispatcher goes away.
    pub async fn run(mut self) {
        debug!(worker = %self.id, "worker started");

        loop {
            let (inbox, mut slot) = oneshot::channel();
            let idle = IdleWorker {
                worker_id: Arc::clone(&self.id),
                inbox,
            };

            tokio::select! {
                biased;
                () = self.shutdown.wait() => break,
                published = self.idle_tx.send(idle) => {
                    if published.is_err() {
                        break;
                    }
                }
            }

            // A request already placed in the slot wins over shutdown, so a
            // completed hand-off is always executed.
            let request = tokio::select! {
                biased;
                received = &mut slot => match received {
                    Ok(request) => request,
                    // Dispatcher exited holding our inbox.
                    Err(_) => break,
                },
                () = self.shutdown.wait() => {
                    if let Some(request) = seal(slot) {
                        debug!(worker = %self.id, "request arrived as shutdown fired");
                        self.process(request).await;
                    }
                    break;
                }
            };

            self.process(request).await;
        }

        info!(worker = %self.id, "worker closed");
    }

    async fn process(&self, request: WorkerRequest) {
        let WorkerRequest {
            kind,
            correlation_id,
            payload,
            responder,
        } = request;

        let span = info_span!(
            "request",
            worker = %self.id,
            correlation_id = %correlation_id,
            kind = %kind,
        );

        async move {
            let _in_flight = self.deps.controller.in_flight_guard();
            let start = Instant::now();
            if responder.is_cancelled() {
                debug!("caller stopped waiting before execution started");
            }

            let response = AssertUnwindSafe(self.execute(kind, &correlation_id, &payload))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    error!(panic = panic_message(&*panic), "request handler panicked");
                    OperationResponse::execution_failed(
                        correlation_id.clone(),
                        "internal error while executing request",
                    )
                });

            let elapsed = start.elapsed();
            metrics::counter!(
                "vaultgate_requests_total",
                "kind" => kind.as_str(),
                "status" => response.status.as_str(),
            )
            .increment(1);
            metrics::histogram!("vaultgate_request_duration_seconds", "kind" => kind.as_str())
                .record(elapsed.as_secs_f64());

            let status = response.status;
            match responder.deliver(response) {
                Delivery::Delivered => {
                    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                    debug!(%status, elapsed_ms, "response delivered");
                }
                Delivery::CallerCancelled | Delivery::CallerGone => {
                    debug!(%status, "caller abandoned request, response discarded");
                }
            }
        }
        .instrument(span)
        .await;
    }

    /// Authorizes and runs one request. Never fails: every outcome is a response.
    async fn execute(
        &self,
        kind: OperationKind,
        correlation_id: &str,
        payload: &OperationPayload,
    ) -> OperationResponse {
        let Some(route) = self.deps.routes.get(kind).copied() else {
            warn!("no route registered for request kind");
            return OperationResponse::unmatched(correlation_id, kind);
        };

        let ctx = RequestContext::from_payload(correlation_id, payload);
        let resolved = route.target.resolve(&ctx, payload).and_then(|object| {
            let destination = route
                .destination
                .map(|target| target.resolve(&ctx, payload))
                .transpose()?;
            Ok((object, destination))
        });
        let (object, destination) = match resolved {
            Ok(paths) => paths,
            Err(err) => return OperationResponse::execution_failed(correlation_id, format!("{err:#}")),
        };

        for path in std::iter::once(&object).chain(&destination) {
            if let Err(detail) = authorize(self.deps.gate.as_ref(), &ctx, path, route.access).await {
                info!(subject = %ctx.subject, tenant = %ctx.tenant, object = %path, "request denied");
                return OperationResponse::denied(correlation_id, detail);
            }
        }

        let invocation = Invocation {
            ctx: &ctx,
            payload,
            object: &object,
            destination: destination.as_deref(),
            gate: self.deps.gate.as_ref(),
            provider: self.deps.provider.as_ref(),
        };

        match (route.handler)(invocation).await {
            Ok(result) => OperationResponse::ok(correlation_id, result),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "operation failed");
                OperationResponse::execution_failed(correlation_id, format!("{err:#}"))
            }
        }
    }
}

/// Asks the gate whether `ctx` may access `object` at `access` level.
///
/// Fails closed: a gate error denies the request.
async fn authorize(
    gate: &dyn AuthorizationGate,
    ctx: &RequestContext,
    object: &str,
    access: Access,
) -> Result<(), String> {
    if access == Access::Provision {
        return Ok(());
    }

    for action in access.actions() {
        match gate.check(&ctx.subject, &ctx.tenant, object, action).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, action, "authorization gate failed, denying");
                return Err(format!("authorization check failed: {err}"));
            }
        }
    }

    Err(format!(
        "{} may not {} {object}",
        ctx.subject,
        access.actions().join(" or ")
    ))
}

/// Closes a published inbox and returns whatever the dispatcher managed to
/// put in it first. After this the dispatcher's send fails and it keeps the
/// request.
fn seal(mut slot: oneshot::Receiver<WorkerRequest>) -> Option<WorkerRequest> {
    slot.close();
    slot.try_recv().ok()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use vaultgate_core::{FileHandle, WriteMode};

    use super::*;
    use crate::policy::MemoryPolicyGate;
    use crate::service::operation::{OperationResult, ResponseStatus};
    use crate::service::rendezvous::{rendezvous, ResponseHandle};
    use crate::storage::MemoryResourceProvider;

    async fn deps() -> WorkerDeps {
        let gate = MemoryPolicyGate::new();
        gate.add_policy("alice", "acme", "/acme/alice/*", "*").await.unwrap();

        let provider = MemoryResourceProvider::new();
        provider.create_directory("/acme", WriteMode::CacheThrough).await.unwrap();
        provider
            .create_directory("/acme/alice", WriteMode::CacheThrough)
            .await
            .unwrap();
        let handle = provider
            .create_file("/acme/alice/a.txt", WriteMode::CacheThrough)
            .await
            .unwrap();
        provider.close(handle).await.unwrap();

        WorkerDeps {
            gate: Arc::new(gate),
            provider: Arc::new(provider),
            routes: Arc::new(RouteTable::standard()),
            controller: Arc::new(ShutdownController::new()),
        }
    }

    fn open_request(file: &str) -> (WorkerRequest, ResponseHandle) {
        let (responder, handle) = rendezvous("corr-1");
        let request = WorkerRequest {
            kind: OperationKind::OpenFile,
            correlation_id: "corr-1".to_string(),
            payload: OperationPayload::new("alice", "acme").with_file(file),
            responder,
        };
        (request, handle)
    }

    #[tokio::test]
    async fn hand_off_landing_with_shutdown_is_executed() {
        let deps = deps().await;
        let controller = Arc::clone(&deps.controller);
        let (idle_tx, mut idle_rx) = mpsc::channel(4);
        let worker = tokio::spawn(Worker::new("worker_0", idle_tx, deps).run());

        // The worker is parked on its slot; both events land before it runs again.
        let idle = idle_rx.recv().await.unwrap();
        controller.trigger_shutdown();
        let (request, handle) = open_request("a.txt");
        assert!(idle.inbox.send(request).is_ok());

        worker.await.unwrap();
        let resp = handle.await.unwrap();
        assert_eq!(resp.status, ResponseStatus::Ok);
        assert!(matches!(resp.result, OperationResult::Handle(FileHandle(_))));
    }

    #[tokio::test]
    async fn stopped_worker_refuses_late_hand_off() {
        let deps = deps().await;
        let controller = Arc::clone(&deps.controller);
        let (idle_tx, mut idle_rx) = mpsc::channel(4);
        let worker = tokio::spawn(Worker::new("worker_0", idle_tx, deps).run());

        let idle = idle_rx.recv().await.unwrap();
        controller.trigger_shutdown();
        worker.await.unwrap();

        // The dispatcher gets the request back instead of losing it.
        let (request, _handle) = open_request("a.txt");
        let returned = idle.inbox.send(request).unwrap_err();
        assert_eq!(returned.correlation_id, "corr-1");
    }

    #[test]
    fn sealing_keeps_a_request_already_sent() {
        let (inbox, slot) = oneshot::channel();
        let (request, _handle) = open_request("a.txt");
        inbox.send(request).unwrap();

        let kept = seal(slot).unwrap();
        assert_eq!(kept.correlation_id, "corr-1");
    }

    #[test]
    fn sealing_an_empty_slot_bounces_later_sends() {
        let (inbox, slot) = oneshot::channel();
        assert!(seal(slot).is_none());

        let (request, _handle) = open_request("a.txt");
        assert!(inbox.send(request).is_err());
    }
}
