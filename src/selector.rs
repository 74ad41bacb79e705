use crate::types::RequestId;
use std::time::Instant;

/// Selection view of one waiting request, snapshotted under the scheduler lock.
#[derive(Debug, Clone, Copy)]
pub struct Waiter {
    pub id: RequestId,
    pub length: usize,
    pub arrived_at: Instant,
}

/// Shortest-first batch composition.
///
/// The backend charges `k * max_len²` per call, so a shorter sequence rides
/// along for free while one long sequence taxes every other member of its
/// batch. Sorting by length (ties by arrival, oldest first) and taking the
/// head keeps `max_len` minimal for the requests most likely to benefit.
/// Longer sequences dispatch once they are among the shortest remaining,
/// which bounds deferral as long as the dispatcher keeps draining.
///
/// Returns at most `max_batch_size` ids, in the order they should be sent.
pub fn select_batch(waiters: &[Waiter], max_batch_size: usize) -> Vec<RequestId> {
    let mut ordered: Vec<&Waiter> = waiters.iter().collect();
    ordered.sort_by(|a, b| {
        a.length
            .cmp(&b.length)
            .then_with(|| a.arrived_at.cmp(&b.arrived_at))
    });

    ordered
        .iter()
        .take(max_batch_size)
        .map(|waiter| waiter.id)
        .collect()
}
