/// Read-only view of worker queue depths. Snapshots may be stale; staleness
/// only degrades load-balancing quality, never correctness.
pub trait LoadOracle {
    fn worker_count(&self) -> usize;
    fn queue_depth(&self, worker_id: u64) -> usize;
}

/// Pick the worker with the smallest inbound queue, ties broken by lowest id.
pub fn pick_worker(oracle: &impl LoadOracle) -> u64 {
    (0..oracle.worker_count() as u64)
        .min_by_key(|&id| (oracle.queue_depth(id), id))
        .unwrap_or(0)
}
