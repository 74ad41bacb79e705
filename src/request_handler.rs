use crate::backend_client::{ClassifyBackend, HttpBackendClient};
use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::registry::Scheduler;
use crate::types::{ClassifyFailure, CompletionReceiver, CompletionSender, RequestId};
use log::debug;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

/// Ingress side of the proxy: registers each inbound sequence with the
/// scheduler and parks the caller on its completion channel until the
/// dispatcher delivers a label or a failure.
pub struct RequestHandler {
    pub config: AppConfig,
    scheduler: Arc<Scheduler>,
    stop: watch::Sender<bool>,
}

impl RequestHandler {
    pub fn new(config: AppConfig) -> Result<Self, anyhow::Error> {
        // create this client once & return potential error (not possible from
        // inside the spawned dispatcher task)
        let backend = HttpBackendClient::new(&config)
            .map_err(|e| anyhow::anyhow!("Failed to create backend client: {e}"))?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Same wiring with the backend swapped out; tests drive this.
    pub fn with_backend(config: AppConfig, backend: Arc<dyn ClassifyBackend>) -> Self {
        let scheduler = Arc::new(Scheduler::new());
        let (stop, stop_receiver) = watch::channel(false);

        Dispatcher::new(config.clone(), scheduler.clone(), backend, stop_receiver).spawn();

        Self {
            config,
            scheduler,
            stop,
        }
    }

    /// Register the sequence, wake the dispatcher, and wait for the label.
    ///
    /// The caller is wakeable by fulfillment (label or failure) and by its
    /// own cancellation: if this future is dropped before the label lands
    /// (client disconnect), the guard pulls the record out of the registry so
    /// the selector skips it. A label arriving for an already-gone caller is
    /// discarded by the dispatcher.
    pub async fn submit(&self, sequence: String) -> Result<String, ClassifyFailure> {
        let (completion, receiver): (CompletionSender, CompletionReceiver) = oneshot::channel();
        let id = self.scheduler.register(sequence, completion);
        debug!("Registered request {id}");

        let mut guard = AbandonGuard {
            scheduler: self.scheduler.clone(),
            id,
            armed: true,
        };

        let outcome = match receiver.await {
            Ok(outcome) => outcome,
            // the dispatcher dropped the sender without resolving; only a bug
            // on its side can cause this
            Err(_) => Err(ClassifyFailure::Internal(
                "completion channel closed".to_string(),
            )),
        };
        guard.armed = false;
        outcome
    }

    /// Stop the dispatcher. Every still-pending request resolves `Cancelled`;
    /// an in-flight backend call is allowed to finish first.
    pub fn shutdown(&self) {
        let _ = self.stop.send(true);
    }
}

struct AbandonGuard {
    scheduler: Arc<Scheduler>,
    id: RequestId,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.scheduler.remove(self.id);
        }
    }
}
