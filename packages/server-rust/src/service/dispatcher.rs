//! Dispatch loop: pairs queued requests with idle workers, one to one.
//!
//! Requests leave the pending queue in FIFO order, so an earlier request is
//! always eligible for a worker before a later one. Which idle worker gets a
//! request is whichever published its inbox first; completion order is not
//! ordered at all.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::operation::WorkerRequest;
use super::shutdown::ShutdownSignal;
use super::worker::IdleWorker;

pub struct Dispatcher {
    pending: mpsc::Receiver<WorkerRequest>,
    idle: mpsc::Receiver<IdleWorker>,
    shutdown: ShutdownSignal,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        pending: mpsc::Receiver<WorkerRequest>,
        idle: mpsc::Receiver<IdleWorker>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            pending,
            idle,
            shutdown,
        }
    }

    /// Runs until shutdown, or until every submitter and worker is gone.
    ///
    /// Returns the number of requests left unmatched. They are dropped, which
    /// resolves each caller's handle with `CallError::Abandoned`.
    pub async fn run(mut self) -> usize {
        debug!("dispatcher started");
        let mut abandoned = 0;

        loop {
            let request = tokio::select! {
                biased;
                () = self.shutdown.wait() => break,
                next = self.pending.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };

            debug!(
                correlation_id = %request.correlation_id,
                kind = %request.kind,
                "request waiting for a worker"
            );

            if self.hand_off(request).await.is_some() {
                abandoned += 1;
                break;
            }
        }

        // Nothing queued from here on will ever be matched.
        self.pending.close();
        while self.pending.try_recv().is_ok() {
            abandoned += 1;
        }

        if abandoned > 0 {
            warn!(abandoned, "dispatcher closed with unmatched requests");
        } else {
            info!("dispatcher closed");
        }
        abandoned
    }

    /// Binds `request` to the first idle worker whose inbox is still open.
    ///
    /// Gives the request back if shutdown fires first or no worker remains.
    async fn hand_off(&mut self, mut request: WorkerRequest) -> Option<WorkerRequest> {
        loop {
            let worker = tokio::select! {
                biased;
                () = self.shutdown.wait() => return Some(request),
                next = self.idle.recv() => match next {
                    Some(worker) => worker,
                    None => return Some(request),
                },
            };

            match worker.inbox.send(request) {
                Ok(()) => {
                    debug!(worker = %worker.worker_id, "request handed to worker");
                    return None;
                }
                // The worker stopped after publishing; try the next one.
                Err(returned) => request = returned,
            }
        }
    }
}
