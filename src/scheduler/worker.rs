//! A single scheduler worker thread: steal a ready request, run its
//! behaviour with every named region open, release, repeat.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crossbeam::deque::Steal;
use log::{trace, warn};

use super::{acquisition, Scheduler};
use super::acquisition::Request;
use crate::runtime::RuntimeInner;

pub(crate) struct Worker {
    ordinal: usize,
    scheduler: Arc<Scheduler>,
    rt: Weak<RuntimeInner>,
}

impl Worker {
    pub fn new(ordinal: usize, scheduler: Arc<Scheduler>, rt: Weak<RuntimeInner>) -> Self {
        Self {
            ordinal,
            scheduler,
            rt,
        }
    }

    pub fn run(self) {
        trace!("worker {} started", self.ordinal);
        loop {
            match self.scheduler.injector.steal() {
                Steal::Success(request) => self.execute(request),
                Steal::Retry => continue,
                Steal::Empty => {
                    let should_continue = self
                        .scheduler
                        .monitor
                        .park_while_idle(|| self.scheduler.injector.is_empty());
                    if !should_continue {
                        break;
                    }
                }
            }
        }
        trace!("worker {} exiting", self.ordinal);
    }

    /// Runs `request`'s behaviour. By the time a request reaches the ready
    /// queue, the acquisition protocol has already established that it is
    /// at the front of every region it needs, so opening them here cannot
    /// fail (§4.5) — no other request can simultaneously hold any of them.
    fn execute(&self, request: Arc<Request>) {
        let Some(rt) = self.rt.upgrade() else {
            return;
        };

        let ids = request.region_ids();
        for &id in ids {
            rt.regions()
                .try_open(id)
                .expect("acquisition protocol guarantees exclusive access");
            rt.mark_open_here(id);
        }

        let behaviour = request.behaviour().clone();
        let result = panic::catch_unwind(AssertUnwindSafe(|| behaviour.run()));

        for &id in ids {
            rt.unmark_open_here(id);
            rt.regions().close(id);
        }

        if let Err(payload) = result {
            warn!(
                "behaviour {} panicked: {}",
                behaviour.id(),
                crate::error::panic_message(&payload)
            );
        }

        let newly_ready = acquisition::release(rt.regions(), &request);
        let any_unblocked = !newly_ready.is_empty();
        for ready in newly_ready {
            self.scheduler.injector.push(ready);
        }

        self.scheduler.monitor.mark_finished();
        if any_unblocked {
            self.scheduler.monitor.notify_work();
        }
    }
}
