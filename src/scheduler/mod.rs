//! The multi-region scheduler (§4.4): a ready queue of behaviours that have
//! passed the acquisition protocol in [`acquisition`], drained by a fixed
//! pool of worker threads.

pub(crate) mod acquisition;
mod monitor;
mod worker;

use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crossbeam::deque::Injector;

use crate::behaviour::Behaviour;
use crate::region::RegionTable;
use crate::runtime::RuntimeInner;
use acquisition::Request;
use monitor::WorkerMonitor;
use worker::Worker;

pub struct Scheduler {
    injector: Injector<Arc<Request>>,
    monitor: WorkerMonitor,
    handles: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl Scheduler {
    pub fn new(worker_count: usize) -> Arc<Self> {
        Arc::new(Self {
            injector: Injector::new(),
            monitor: WorkerMonitor::new(worker_count),
            handles: Mutex::new(Vec::new()),
            worker_count,
        })
    }

    /// Spawns the worker pool. `rt` is a weak reference so a worker thread
    /// never keeps the runtime alive on its own; the runtime shuts the
    /// scheduler down explicitly before it is dropped.
    pub fn start(self: &Arc<Self>, rt: Weak<RuntimeInner>) {
        let mut handles = self.handles.lock().expect("scheduler handles lock");
        for ordinal in 0..self.worker_count {
            let worker = Worker::new(ordinal, self.clone(), rt.clone());
            let handle = std::thread::Builder::new()
                .name(format!("boc-worker-{ordinal}"))
                .spawn(move || worker.run())
                .expect("failed to spawn scheduler worker thread");
            handles.push(handle);
        }
    }

    /// Submits a behaviour: registers it as in-flight, then runs it through
    /// the acquisition protocol (§4.5). If every region it needs is free, it
    /// is immediately pushed onto the ready queue; otherwise it waits in the
    /// regions' FIFO queues and becomes ready later, when released by
    /// whichever behaviours are ahead of it.
    pub fn submit(&self, regions: &RegionTable, behaviour: Arc<Behaviour>) {
        self.monitor.mark_submitted();
        if let Some(request) = acquisition::submit(regions, behaviour) {
            self.injector.push(request);
        }
        self.monitor.notify_work();
    }

    pub fn wait_quiescent(&self) {
        self.monitor.wait_quiescent();
    }

    pub fn shutdown(&self) {
        self.monitor.request_shutdown();
        let mut handles = self.handles.lock().expect("scheduler handles lock");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}
