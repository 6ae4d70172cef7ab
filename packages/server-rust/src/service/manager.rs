//! Composition root of the dispatch engine.
//!
//! A [`Manager`] owns the pending-request queue, the idle-worker set, the
//! shutdown controller, and the handles of the dispatcher and worker tasks.
//! It is created once by the process entry point and shared (behind an
//! `Arc`) with the transport layer; there is no global instance.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;
use vaultgate_core::{AuthorizationGate, OperationKind, OperationPayload, ResourceProvider};

use super::config::{ConfigError, ServerConfig};
use super::dispatcher::Dispatcher;
use super::operation::{CallError, OperationResponse, SubmitError, WorkerRequest};
use super::rendezvous::{rendezvous, ResponseHandle};
use super::routes::RouteTable;
use super::shutdown::{HealthState, ShutdownController};
use super::worker::{Worker, WorkerDeps};

/// What `Manager::shutdown` observed while stopping the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks (dispatcher and workers) that exited on their own.
    pub exited: usize,
    /// Tasks still running when the grace period ran out; they were aborted.
    pub aborted: Vec<String>,
    /// Queued requests the dispatcher left unmatched.
    pub abandoned: usize,
}

impl ShutdownReport {
    /// Whether every task exited within the grace period.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.aborted.is_empty()
    }
}

/// Owns the worker pool and the dispatch loop.
pub struct Manager {
    config: ServerConfig,
    pending_tx: mpsc::Sender<WorkerRequest>,
    controller: Arc<ShutdownController>,
    dispatcher: Mutex<Option<JoinHandle<usize>>>,
    workers: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Manager {
    /// Starts a pool serving every standard operation.
    ///
    /// Spawns the dispatcher and `config.worker_count` workers on the current
    /// tokio runtime and returns without waiting for them.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn start(
        config: ServerConfig,
        gate: Arc<dyn AuthorizationGate>,
        provider: Arc<dyn ResourceProvider>,
    ) -> Result<Self, ConfigError> {
        Self::start_with_routes(config, RouteTable::standard(), gate, provider)
    }

    /// Starts a pool that serves only the kinds registered in `routes`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn start_with_routes(
        config: ServerConfig,
        routes: RouteTable,
        gate: Arc<dyn AuthorizationGate>,
        provider: Arc<dyn ResourceProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let controller = Arc::new(ShutdownController::new());
        let (pending_tx, pending_rx) = mpsc::channel(config.queue_capacity);
        // Each worker has at most one inbox published at a time.
        let (idle_tx, idle_rx) = mpsc::channel(config.worker_count);

        let deps = WorkerDeps {
            gate,
            provider,
            routes: Arc::new(routes),
            controller: Arc::clone(&controller),
        };

        let dispatcher = Dispatcher::new(pending_rx, idle_rx, controller.signal());
        let dispatcher = tokio::spawn(dispatcher.run());

        let workers = (0..config.worker_count)
            .map(|i| {
                let id = format!("worker_{i}");
                let worker = Worker::new(id.as_str(), idle_tx.clone(), deps.clone());
                (id, tokio::spawn(worker.run()))
            })
            .collect();

        controller.set_ready();
        info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            "manager started"
        );

        Ok(Self {
            config,
            pending_tx,
            controller,
            dispatcher: Mutex::new(Some(dispatcher)),
            workers: Mutex::new(workers),
        })
    }

    /// Enqueues a request without blocking.
    ///
    /// Only queues the request; authorization and execution happen later on a
    /// worker. Await the returned handle for the response.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::Overloaded`] if the pending queue is full.
    /// - [`SubmitError::ShuttingDown`] once shutdown has been triggered.
    pub fn submit(
        &self,
        kind: OperationKind,
        payload: OperationPayload,
    ) -> Result<ResponseHandle, SubmitError> {
        if self.controller.is_triggered() {
            return Err(reject(SubmitError::ShuttingDown));
        }

        let correlation_id = Uuid::new_v4().to_string();
        let (responder, handle) = rendezvous(&correlation_id);
        let request = WorkerRequest {
            kind,
            correlation_id,
            payload,
            responder,
        };

        match self.pending_tx.try_send(request) {
            Ok(()) => Ok(handle),
            Err(TrySendError::Full(request)) => {
                warn!(correlation_id = %request.correlation_id, %kind, "pending queue full");
                Err(reject(SubmitError::Overloaded))
            }
            Err(TrySendError::Closed(_)) => Err(reject(SubmitError::ShuttingDown)),
        }
    }

    /// Submits a request and waits up to `timeout` for its response.
    ///
    /// On deadline the request is cancelled and a `Timeout` response returned;
    /// the worker may still run the operation, but its response is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::Submit`] if the request was not accepted, and
    /// [`CallError::Abandoned`] if shutdown dropped it before a worker took it.
    pub async fn call(
        &self,
        kind: OperationKind,
        payload: OperationPayload,
        timeout: Duration,
    ) -> Result<OperationResponse, CallError> {
        let handle = self.submit(kind, payload)?;
        handle.recv_timeout(timeout).await
    }

    /// Signals shutdown and waits for the dispatcher and workers to exit.
    ///
    /// Requests already executing run to completion and are delivered to
    /// callers still waiting. Queued requests are left unmatched. Tasks still
    /// running after `shutdown_grace` are aborted. Calling this again returns
    /// an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.controller.trigger_shutdown();
        info!("manager shutting down");

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace();
        let mut report = ShutdownReport::default();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(mut handle) = dispatcher {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(abandoned)) => {
                    report.exited += 1;
                    report.abandoned = abandoned;
                }
                Ok(Err(err)) => {
                    error!(error = %err, "dispatcher task failed");
                    report.exited += 1;
                }
                Err(_elapsed) => {
                    handle.abort();
                    report.aborted.push("dispatcher".to_string());
                }
            }
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for (id, mut handle) in workers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.exited += 1,
                Ok(Err(err)) => {
                    error!(worker = %id, error = %err, "worker task failed");
                    report.exited += 1;
                }
                Err(_elapsed) => {
                    handle.abort();
                    warn!(worker = %id, "worker still busy after grace period, aborted");
                    report.aborted.push(id);
                }
            }
        }

        if report.is_clean() {
            self.controller.mark_stopped();
        }
        info!(
            exited = report.exited,
            aborted = report.aborted.len(),
            abandoned = report.abandoned,
            "manager stopped"
        );
        report
    }

    /// Shared handle to the shutdown controller, for health reporting.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.controller)
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.controller.health_state()
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of requests queued and not yet handed to a worker.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_tx.max_capacity() - self.pending_tx.capacity()
    }
}

fn reject(err: SubmitError) -> SubmitError {
    metrics::counter!("vaultgate_submit_rejected_total", "reason" => err.as_str()).increment(1);
    err
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
