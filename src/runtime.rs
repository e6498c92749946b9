//! The runtime: owns the heap, the region table and the scheduler, and is
//! the entry point for creating regions/objects and scheduling behaviours
//! (§4, §6).

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use crate::behaviour::{Behaviour, BehaviourBody};
use crate::error::Result;
use crate::heap::Heap;
use crate::object::Object;
use crate::region::{Region, RegionId, RegionTable};
use crate::scheduler::Scheduler;
use crate::util::options::Options;

thread_local! {
    /// The regions currently open on this thread, whether opened through a
    /// scoped [`crate::region::RegionGuard`] or because a scheduler worker
    /// is running a behaviour against them. The write barrier consults this
    /// to decide whether a field access is legal (§4.1).
    static OPEN_REGIONS: RefCell<HashSet<RegionId>> = RefCell::new(HashSet::new());
}

pub(crate) struct RuntimeInner {
    heap: Heap,
    regions: RegionTable,
    scheduler: Arc<Scheduler>,
    #[allow(dead_code)]
    options: Options,
}

impl RuntimeInner {
    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub(crate) fn is_open_here(&self, id: RegionId) -> bool {
        let id = self.regions.resolve(id);
        OPEN_REGIONS.with(|set| set.borrow().contains(&id))
    }

    pub(crate) fn mark_open_here(&self, id: RegionId) {
        OPEN_REGIONS.with(|set| {
            set.borrow_mut().insert(id);
        });
    }

    pub(crate) fn unmark_open_here(&self, id: RegionId) {
        OPEN_REGIONS.with(|set| {
            set.borrow_mut().remove(&id);
        });
    }
}

/// A handle to a running behaviour-oriented concurrency runtime.
///
/// Cloning a `Runtime` shares the same heap, regions and scheduler — it is a
/// cheap `Arc` clone, the way the embedding this crate is modelled on treats
/// its process-wide runtime singleton.
#[derive(Clone)]
pub struct Runtime(Arc<RuntimeInner>);

impl Runtime {
    /// Starts a runtime sized from the environment (`BOC_WORKER_THREADS`,
    /// see [`Options`]).
    pub fn new() -> Self {
        Self::with_options(Options::from_env())
    }

    pub fn with_options(options: Options) -> Self {
        crate::util::logger::init();
        let scheduler = Scheduler::new(*options.worker_threads);
        let inner = Arc::new(RuntimeInner {
            heap: Heap::new(),
            regions: RegionTable::new(),
            scheduler: scheduler.clone(),
            options,
        });
        scheduler.start(Arc::downgrade(&inner));
        Self(inner)
    }

    /// Allocates a new, private, top-level region.
    pub fn region(&self) -> Region {
        let id = self.0.regions.create(&self.0.heap);
        Region::new(id, self.0.clone())
    }

    /// Allocates a new, free (homeless) object.
    pub fn object(&self) -> Object {
        let id = self.0.heap.alloc();
        Object::new(id, self.0.clone())
    }

    /// Schedules a behaviour over `regions`, returning as soon as it is
    /// queued — `body` runs later, on a worker thread, once every named
    /// region has been atomically opened (§4.3, §4.5). Every region in
    /// `regions` must already be shared.
    pub fn when<F>(&self, regions: Vec<Region>, body: F) -> Result<()>
    where
        F: FnOnce(&[Region]) + Send + 'static,
    {
        let boxed: BehaviourBody = Box::new(body);
        let behaviour = Behaviour::new(&self.0, regions, boxed)?;
        self.0.scheduler.submit(&self.0.regions, Arc::new(behaviour));
        Ok(())
    }

    /// Blocks until the runtime is quiescent: no behaviour running and none
    /// queued (§4.6).
    pub fn wait(&self) {
        self.0.scheduler.wait_quiescent();
    }

    /// Waits for quiescence, then stops the worker pool. The runtime cannot
    /// be used afterwards.
    pub fn shutdown(self) {
        self.wait();
        self.0.scheduler.shutdown();
    }

    pub fn worker_count(&self) -> usize {
        self.0.scheduler.worker_count()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
