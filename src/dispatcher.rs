use crate::backend_client::{BackendError, ClassifyBackend};
use crate::config::AppConfig;
use crate::registry::Scheduler;
use crate::types::{BatchMember, ClassifyFailure};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;

/// The single consumer that turns waiting requests into backend calls.
///
/// There is exactly one dispatcher task per proxy, which is what keeps at
/// most one backend call in flight. Each iteration waits for work, selects a
/// batch, issues one call, and fans the outcome back out. A throttled batch
/// is re-queued intact; per-batch errors never stop the loop - only the stop
/// signal does.
pub struct Dispatcher {
    config: AppConfig,
    scheduler: Arc<Scheduler>,
    backend: Arc<dyn ClassifyBackend>,
    stop: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        config: AppConfig,
        scheduler: Arc<Scheduler>,
        backend: Arc<dyn ClassifyBackend>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            scheduler,
            backend,
            stop,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Dispatcher started");
        loop {
            if *self.stop.borrow() {
                break;
            }

            if !self.scheduler.has_waiting() {
                tokio::select! {
                    _ = self.scheduler.work_available() => {}
                    changed = self.stop.changed() => {
                        // a closed stop channel means the handler is gone
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            let batch = self.scheduler.take_batch(self.config.max_batch_size);
            if batch.is_empty() {
                // every queued id belonged to a cancelled caller
                continue;
            }

            self.dispatch(batch).await;
        }

        self.drain();
        info!("Dispatcher stopped");
    }

    async fn dispatch(&mut self, batch: Vec<BatchMember>) {
        let sequences: Vec<String> = batch.iter().map(|member| member.sequence.clone()).collect();
        debug!(
            "Dispatching batch of {} (max_len {})",
            batch.len(),
            sequences.iter().map(|s| s.chars().count()).max().unwrap_or(0)
        );

        match self.backend.classify(&sequences).await {
            Ok(labels) => self.fan_out(batch, labels),
            Err(BackendError::Throttled) => {
                debug!("Backend throttled, re-queueing {} requests", batch.len());
                // nothing resolves; the whole batch returns to the head in
                // its original batch order
                self.scheduler
                    .requeue_front(batch.into_iter().map(|member| member.id).collect());

                tokio::select! {
                    _ = tokio::time::sleep(self.config.throttle_backoff()) => {}
                    _ = self.stop.changed() => {}
                }
            }
            Err(e) => {
                error!("Batch of {} failed: {}", batch.len(), e.message());
                self.fail_batch(&batch, ClassifyFailure::Transport(e.message()));
            }
        }
    }

    /// Labels are positional: member i gets label i. Members whose caller
    /// cancelled while the call was in flight have their label discarded.
    fn fan_out(&self, batch: Vec<BatchMember>, labels: Vec<String>) {
        if labels.len() != batch.len() {
            error!(
                "Backend returned {} labels for a batch of {}",
                labels.len(),
                batch.len()
            );
            let failure = ClassifyFailure::Internal(format!(
                "label count mismatch: expected {}, got {}",
                batch.len(),
                labels.len()
            ));
            self.fail_batch(&batch, failure);
            return;
        }

        for (member, label) in batch.into_iter().zip(labels) {
            match self.scheduler.remove(member.id) {
                Some(record) => {
                    if record.completion.send(Ok(label)).is_err() {
                        warn!("Client for request {} disconnected before its label arrived", member.id);
                    }
                }
                None => debug!("Request {} was cancelled in flight, label dropped", member.id),
            }
        }
    }

    fn fail_batch(&self, batch: &[BatchMember], failure: ClassifyFailure) {
        for member in batch {
            if let Some(record) = self.scheduler.remove(member.id) {
                let _ = record.completion.send(Err(failure.clone()));
            }
        }
    }

    /// Shutdown path: nothing further is selected, every unresolved request
    /// (queued or in the registry) resolves `Cancelled`.
    fn drain(&self) {
        let evicted = self.scheduler.evict_all();
        if !evicted.is_empty() {
            info!("Cancelling {} pending requests on shutdown", evicted.len());
        }
        for record in evicted {
            let _ = record.completion.send(Err(ClassifyFailure::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompletionReceiver;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::oneshot::error::TryRecvError;

    /// Pops one scripted outcome per call; records every batch it sees.
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<Vec<String>, BackendError>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<Vec<String>, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClassifyBackend for ScriptedBackend {
        async fn classify(&self, sequences: &[String]) -> Result<Vec<String>, BackendError> {
            self.calls.lock().unwrap().push(sequences.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec!["code".to_string(); sequences.len()]))
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            throttle_backoff_ms: 1,
            ..AppConfig::default()
        }
    }

    fn dispatcher_with(
        backend: Arc<ScriptedBackend>,
    ) -> (Dispatcher, Arc<Scheduler>, watch::Sender<bool>) {
        let scheduler = Arc::new(Scheduler::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(test_config(), scheduler.clone(), backend, stop_rx);
        (dispatcher, scheduler, stop_tx)
    }

    fn submit(scheduler: &Scheduler, sequence: &str) -> CompletionReceiver {
        let (completion, receiver) = tokio::sync::oneshot::channel();
        scheduler.register(sequence.to_string(), completion);
        receiver
    }

    #[tokio::test]
    async fn test_fan_out_is_positional() {
        let backend = ScriptedBackend::new(vec![Ok(vec![
            "code".to_string(),
            "not code".to_string(),
        ])]);
        let (mut dispatcher, scheduler, _stop) = dispatcher_with(backend);

        let rx_a = submit(&scheduler, "a");
        let rx_b = submit(&scheduler, "bb");

        let batch = scheduler.take_batch(5);
        dispatcher.dispatch(batch).await;

        assert_eq!(rx_a.await.unwrap(), Ok("code".to_string()));
        assert_eq!(rx_b.await.unwrap(), Ok("not code".to_string()));
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_throttled_batch_is_fully_preserved() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Throttled)]);
        let (mut dispatcher, scheduler, _stop) = dispatcher_with(backend.clone());

        let mut rx_a = submit(&scheduler, "a");
        let mut rx_b = submit(&scheduler, "bb");

        let batch = scheduler.take_batch(5);
        dispatcher.dispatch(batch).await;

        // no completion resolved, both records still pending and re-queued
        assert!(matches!(rx_a.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(scheduler.pending_len(), 2);
        assert_eq!(scheduler.waiting_len(), 2);

        // retry sends the identical batch
        let retry = scheduler.take_batch(5);
        dispatcher.dispatch(retry).await;
        let calls = backend.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
        assert!(rx_a.await.unwrap().is_ok());
        assert!(rx_b.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_transport_error_fans_out_to_whole_batch() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::HttpError {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: "upstream died".to_string(),
        })]);
        let (mut dispatcher, scheduler, _stop) = dispatcher_with(backend);

        let rx_a = submit(&scheduler, "a");
        let rx_b = submit(&scheduler, "bb");

        let batch = scheduler.take_batch(5);
        dispatcher.dispatch(batch).await;

        for rx in [rx_a, rx_b] {
            match rx.await.unwrap() {
                Err(ClassifyFailure::Transport(reason)) => {
                    assert!(reason.contains("upstream died"))
                }
                other => panic!("expected transport failure, got {other:?}"),
            }
        }
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_label_count_mismatch_resolves_internal_without_crashing() {
        let backend = ScriptedBackend::new(vec![Ok(vec!["code".to_string()])]);
        let (mut dispatcher, scheduler, _stop) = dispatcher_with(backend);

        let rx_a = submit(&scheduler, "a");
        let rx_b = submit(&scheduler, "bb");

        let batch = scheduler.take_batch(5);
        dispatcher.dispatch(batch).await;

        for rx in [rx_a, rx_b] {
            match rx.await.unwrap() {
                Err(ClassifyFailure::Internal(reason)) => assert!(reason.contains("mismatch")),
                other => panic!("expected internal failure, got {other:?}"),
            }
        }

        // the dispatcher keeps going afterwards
        let rx_c = submit(&scheduler, "ccc");
        let batch = scheduler.take_batch(5);
        dispatcher.dispatch(batch).await;
        assert!(rx_c.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_member_has_its_label_discarded() {
        let backend = ScriptedBackend::new(vec![]);
        let (mut dispatcher, scheduler, _stop) = dispatcher_with(backend);

        let rx_a = submit(&scheduler, "a");
        let rx_b = submit(&scheduler, "bb");

        let batch = scheduler.take_batch(5);
        // caller of `bb` goes away while the call is in flight
        let cancelled_id = batch[1].id;
        drop(rx_b);
        scheduler.remove(cancelled_id);

        dispatcher.dispatch(batch).await;

        assert!(rx_a.await.unwrap().is_ok());
        assert_eq!(scheduler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_drain_cancels_everything_pending() {
        let backend = ScriptedBackend::new(vec![]);
        let (dispatcher, scheduler, _stop) = dispatcher_with(backend);

        let rx_a = submit(&scheduler, "a");
        let rx_b = submit(&scheduler, "bb");

        dispatcher.drain();

        assert_eq!(rx_a.await.unwrap(), Err(ClassifyFailure::Cancelled));
        assert_eq!(rx_b.await.unwrap(), Err(ClassifyFailure::Cancelled));
        assert_eq!(scheduler.pending_len(), 0);
        assert_eq!(scheduler.waiting_len(), 0);
    }
}
