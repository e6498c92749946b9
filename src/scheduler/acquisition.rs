//! The two-phase region acquisition protocol (§4.5) — "the heart" of the
//! scheduler.
//!
//! A behaviour's [`Request`] is appended to every region it needs, in a
//! fixed canonical order (regions sorted by identity). A worker never holds
//! a partial set of regions while waiting for the rest: enqueueing never
//! blocks, and a behaviour only becomes runnable once it is simultaneously
//! at the front of every one of its regions' queues. Because every
//! behaviour acquires its regions in the same total order, no cycle of
//! waits between behaviours can form — the deadlock-freedom argument is the
//! same one that justifies lock-ordering discipline in any multi-lock
//! system, just without a thread ever blocking mid-acquisition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::behaviour::Behaviour;
use crate::region::{RegionId, RegionTable};

/// A behaviour's outstanding acquisition, shared across every per-region
/// FIFO queue it has been appended to. `pending` starts at the number of
/// regions named and is decremented once per region as each reports this
/// request is at its head; the request is runnable once `pending` reaches
/// zero.
pub(crate) struct Request {
    behaviour: Arc<Behaviour>,
    region_ids: Vec<RegionId>,
    pending: AtomicUsize,
}

impl Request {
    pub(crate) fn behaviour(&self) -> &Arc<Behaviour> {
        &self.behaviour
    }

    pub(crate) fn region_ids(&self) -> &[RegionId] {
        &self.region_ids
    }

    /// Reports that this request is now at the front of one of its
    /// regions' queues. Returns `true` exactly once — for whichever
    /// region's report is the last one outstanding — so exactly one caller
    /// ever treats this request as newly runnable.
    fn mark_region_ready(self: &Arc<Self>) -> bool {
        self.pending.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// Resolves each id to its current canonical region (a behaviour's region
/// set is fixed at construction, but a named region may since have been
/// merged into another), then sorts and dedups — the fixed total order
/// acquisition relies on for deadlock-freedom.
fn acquire_order(table: &RegionTable, ids: &[RegionId]) -> Vec<RegionId> {
    let mut resolved: Vec<RegionId> = ids.iter().map(|id| table.resolve(*id)).collect();
    resolved.sort();
    resolved.dedup();
    resolved
}

/// Enqueues `behaviour` on every region it needs (§4.5 steps 1-2). Returns
/// the request if it became ready synchronously during this call — every
/// region's queue was empty, or otherwise reached head, before `submit`
/// returned — in which case the caller must push it onto the scheduler's
/// ready queue itself. Otherwise the request becomes ready later,
/// asynchronously, when its last predecessor releases (see [`release`]).
pub(crate) fn submit(table: &RegionTable, behaviour: Arc<Behaviour>) -> Option<Arc<Request>> {
    let region_ids = acquire_order(table, behaviour.region_ids());
    let pending = region_ids.len();
    let request = Arc::new(Request {
        behaviour,
        region_ids,
        pending: AtomicUsize::new(pending),
    });

    let mut ready = false;
    for &id in request.region_ids() {
        if table.enqueue(id, request.clone()) && request.mark_region_ready() {
            ready = true;
        }
    }
    if ready {
        Some(request)
    } else {
        None
    }
}

/// Releases every region `request` held (§4.5's "Release"), cascading
/// readiness to whichever request is now at the front of each. Returns
/// every request that became ready as a result — usually zero or one, but a
/// single release can unblock several independent behaviours at once if
/// they each only overlapped with the one that just finished on a single,
/// different region.
pub(crate) fn release(table: &RegionTable, request: &Arc<Request>) -> Vec<Arc<Request>> {
    // `request.region_ids()` were canonical at submission time, but a merge
    // run from inside the behaviour's own body (sanctioned by §4.2 when both
    // sides are in its region set) can have since aliased two of them onto
    // the same physical region. Re-resolve and dedup here so that region's
    // queue is only popped once — popping it per original id would both
    // double-advance it and leave whichever id lost its identity in the
    // merge never released at all.
    let mut canonical: Vec<RegionId> = request.region_ids().iter().map(|&id| table.resolve(id)).collect();
    canonical.sort();
    canonical.dedup();

    let mut newly_ready = Vec::new();
    for id in canonical {
        if let Some(next) = table.release_head(id) {
            if next.mark_region_ready() {
                newly_ready.push(next);
            }
        }
    }
    newly_ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    #[test]
    fn acquire_order_resolves_merged_aliases_and_dedups() {
        let heap = Heap::new();
        let table = RegionTable::new();
        let a = table.create(&heap);
        let b = table.create(&heap);
        let c = table.create(&heap);

        table.try_open(a).unwrap();
        table.try_open(b).unwrap();
        table
            .merge(&heap, a, b, &|_| true)
            .expect("both regions reported open");
        table.close(a);
        table.close(b);

        // `b` is now an alias of `a`; naming both (plus a duplicate of `a`)
        // must collapse to a single canonical, sorted id list.
        let order = acquire_order(&table, &[c, b, a, a]);
        assert_eq!(order.len(), 2);
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn enqueue_reports_head_only_for_the_first_arrival() {
        let heap = Heap::new();
        let table = RegionTable::new();
        let a = table.create(&heap);

        // Two independent acquisition requests competing for the same
        // region queue: only the first enqueue finds the queue empty.
        let make_request = || {
            Arc::new(Request {
                behaviour: Arc::new(Behaviour::for_test(vec![a])),
                region_ids: vec![a],
                pending: AtomicUsize::new(1),
            })
        };
        let first = make_request();
        let second = make_request();
        assert!(table.enqueue(a, first.clone()));
        assert!(!table.enqueue(a, second.clone()));

        // Releasing the first promotes the second to head.
        let promoted = table.release_head(a);
        assert!(promoted.is_some());
        assert!(Arc::ptr_eq(&promoted.unwrap(), &second));
    }
}
