//! Worker parking and quiescence detection (§4.6).
//!
//! Two independent concerns share this type: idling workers park on a
//! condition variable until the ready queue has work or shutdown is
//! requested, and a separate `in_flight` counter tracks every behaviour from
//! the moment it is submitted until it has released every region it held —
//! `wait()` blocks on *that* counter reaching zero, not on worker idleness.
//! Folding pending/ready/running/releasing into one counter, incremented
//! before any per-region enqueue begins and decremented only after release,
//! means `wait()` can never observe a false "quiescent" in the narrow window
//! while a behaviour is still being enqueued onto its later regions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

struct ParkState {
    worker_count: usize,
    parked: usize,
    shutdown: bool,
}

pub(crate) struct WorkerMonitor {
    state: Mutex<ParkState>,
    work_available: Condvar,
    in_flight: AtomicUsize,
    quiescent_gate: Mutex<()>,
    quiescent: Condvar,
}

impl WorkerMonitor {
    pub fn new(worker_count: usize) -> Self {
        Self {
            state: Mutex::new(ParkState {
                worker_count,
                parked: 0,
                shutdown: false,
            }),
            work_available: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            quiescent_gate: Mutex::new(()),
            quiescent: Condvar::new(),
        }
    }

    /// Wakes every parked worker; called whenever a behaviour is submitted
    /// or finishes (which may let a previously blocked behaviour acquire
    /// its regions).
    pub fn notify_work(&self) {
        self.work_available.notify_all();
    }

    /// Registers one more in-flight behaviour. Must happen before any
    /// per-region enqueue for it begins (§4.6), so a concurrent `wait()`
    /// can never observe quiescence while this submission is still underway.
    pub fn mark_submitted(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Marks one in-flight behaviour as fully finished: its body has run
    /// and every region it held has been released. Wakes any caller blocked
    /// in [`Self::wait_quiescent`] if this was the last one.
    pub fn mark_finished(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.quiescent_gate.lock().expect("quiescent gate lock");
            self.quiescent.notify_all();
        }
    }

    pub fn request_shutdown(&self) {
        let mut state = self.state.lock().expect("monitor lock");
        state.shutdown = true;
        self.work_available.notify_all();
    }

    /// Parks the calling worker while `still_idle` holds and no shutdown has
    /// been requested. Returns `false` once the worker should exit.
    pub fn park_while_idle(&self, still_idle: impl Fn() -> bool) -> bool {
        let mut state = self.state.lock().expect("monitor lock");
        state.parked += 1;
        while still_idle() && !state.shutdown {
            state = self.work_available.wait(state).expect("monitor wait");
        }
        state.parked -= 1;
        !state.shutdown
    }

    /// Blocks until every submitted behaviour has finished and released its
    /// regions.
    pub fn wait_quiescent(&self) {
        let mut guard = self.quiescent_gate.lock().expect("quiescent gate lock");
        while self.in_flight.load(Ordering::Acquire) != 0 {
            guard = self.quiescent.wait(guard).expect("quiescent wait");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerMonitor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn wait_quiescent_blocks_until_in_flight_count_drains() {
        let monitor = Arc::new(WorkerMonitor::new(2));
        monitor.mark_submitted();
        monitor.mark_submitted();

        let done = Arc::new(AtomicBool::new(false));
        std::thread::scope(|scope| {
            let m = monitor.clone();
            let done1 = done.clone();
            scope.spawn(move || {
                m.wait_quiescent();
                done1.store(true, Ordering::SeqCst);
            });

            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(!done.load(Ordering::SeqCst));

            monitor.mark_finished();
            std::thread::sleep(std::time::Duration::from_millis(20));
            assert!(!done.load(Ordering::SeqCst));

            monitor.mark_finished();
        });

        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn idle_workers_park_and_wake_on_notify() {
        let monitor = Arc::new(WorkerMonitor::new(1));
        let woke = Arc::new(AtomicBool::new(false));

        std::thread::scope(|scope| {
            let m = monitor.clone();
            let woke1 = woke.clone();
            let handle = scope.spawn(move || {
                let should_continue = m.park_while_idle(|| !woke1.load(Ordering::SeqCst));
                assert!(should_continue);
            });

            std::thread::sleep(std::time::Duration::from_millis(20));
            woke.store(true, Ordering::SeqCst);
            monitor.notify_work();
            handle.join().unwrap();
        });
    }

    #[test]
    fn shutdown_releases_parked_workers() {
        let monitor = Arc::new(WorkerMonitor::new(1));
        std::thread::scope(|scope| {
            let m = monitor.clone();
            let handle = scope.spawn(move || m.park_while_idle(|| true));
            std::thread::sleep(std::time::Duration::from_millis(20));
            monitor.request_shutdown();
            assert!(!handle.join().unwrap());
        });
    }
}
