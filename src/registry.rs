use crate::selector::{self, Waiter};
use crate::types::{BatchMember, CompletionSender, PendingRequest, RequestId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// Id-keyed store of unresolved requests. This is the source of truth; the
/// arrival queue is only an index into it.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    records: HashMap<RequestId, PendingRequest>,
}

impl PendingRegistry {
    pub fn insert(&mut self, record: PendingRequest) {
        self.records.insert(record.id, record);
    }

    pub fn remove(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.records.remove(&id)
    }

    pub fn get(&self, id: RequestId) -> Option<&PendingRequest> {
        self.records.get(&id)
    }

    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.records.drain().map(|(_, record)| record).collect()
    }

    /// Selection snapshot for the given ids, skipping ids whose record is
    /// gone (cancelled callers). Keeps the input order.
    pub fn snapshot_waiting(&self, ids: &[RequestId]) -> Vec<Waiter> {
        ids.iter()
            .filter_map(|&id| {
                self.records.get(&id).map(|record| Waiter {
                    id,
                    length: record.length,
                    arrived_at: record.arrived_at,
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Arrival-ordered request ids awaiting dispatch. Only the ingress side
/// appends; only the dispatcher drains.
#[derive(Debug, Default)]
pub struct ArrivalQueue {
    ids: VecDeque<RequestId>,
}

impl ArrivalQueue {
    pub fn push_back(&mut self, id: RequestId) {
        self.ids.push_back(id);
    }

    /// Re-queue ids at the head, keeping the order given: `ids[0]` ends up
    /// first in line.
    pub fn push_front_many(&mut self, ids: Vec<RequestId>) {
        for id in ids.into_iter().rev() {
            self.ids.push_front(id);
        }
    }

    /// Atomic hand-off of everything queued, in arrival order.
    pub fn drain(&mut self) -> Vec<RequestId> {
        self.ids.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    registry: PendingRegistry,
    arrivals: ArrivalQueue,
    next_id: RequestId,
}

/// Registry and arrival queue under a single lock, plus the dispatcher's
/// work-available signal. Shared between the ingress side and the dispatcher;
/// critical sections are short and never held across an await.
#[derive(Debug, Default)]
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    work_available: Notify,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new arrival under a fresh id and wake the dispatcher.
    pub fn register(&self, sequence: String, completion: CompletionSender) -> RequestId {
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.registry.insert(PendingRequest::new(id, sequence, completion));
            state.arrivals.push_back(id);
            id
        };
        self.work_available.notify_one();
        id
    }

    /// Remove a record, either for fan-out or because its caller went away.
    /// A queue entry still pointing at the id is skipped during selection.
    pub fn remove(&self, id: RequestId) -> Option<PendingRequest> {
        self.lock().registry.remove(id)
    }

    pub fn has_waiting(&self) -> bool {
        !self.lock().arrivals.is_empty()
    }

    pub fn waiting_len(&self) -> usize {
        self.lock().arrivals.len()
    }

    pub fn pending_len(&self) -> usize {
        self.lock().registry.len()
    }

    /// Drain the queue, pick the next batch, and put the rest back at the
    /// head in arrival order. Ids whose record is gone (cancelled callers)
    /// are dropped here. Batch members stay in the registry until fan-out.
    pub fn take_batch(&self, max_batch_size: usize) -> Vec<BatchMember> {
        let mut state = self.lock();
        let drained = state.arrivals.drain();

        let waiters = state.registry.snapshot_waiting(&drained);
        let selected = selector::select_batch(&waiters, max_batch_size);

        let leftover: Vec<RequestId> = drained
            .iter()
            .copied()
            .filter(|id| !selected.contains(id) && state.registry.get(*id).is_some())
            .collect();
        state.arrivals.push_front_many(leftover);

        selected
            .iter()
            .filter_map(|&id| {
                state.registry.get(id).map(|record| BatchMember {
                    id,
                    sequence: record.sequence.clone(),
                })
            })
            .collect()
    }

    /// A throttled batch goes back to the head unchanged, in batch order.
    pub fn requeue_front(&self, ids: Vec<RequestId>) {
        self.lock().arrivals.push_front_many(ids);
    }

    /// Empty both structures; shutdown resolves the returned records.
    pub fn evict_all(&self) -> Vec<PendingRequest> {
        let mut state = self.lock();
        state.arrivals.drain();
        state.registry.drain()
    }

    /// Suspend until `register` signals new work. Spurious wakeups are fine;
    /// the dispatcher re-checks the queue afterwards.
    pub async fn work_available(&self) {
        self.work_available.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().expect("scheduler state lock poisoned")
    }
}
