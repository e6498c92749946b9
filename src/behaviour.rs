//! Behaviours: atomic units of work scheduled against a set of regions
//! (§4.3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BocError, Result};
use crate::region::{Region, RegionId};
use crate::runtime::RuntimeInner;

static NEXT_BEHAVIOUR_ID: AtomicU64 = AtomicU64::new(1);

pub type BehaviourBody = Box<dyn FnOnce(&[Region]) + Send + 'static>;

/// A scheduled unit of work together with the regions it needs exclusive
/// access to. Every region named by a behaviour must already be shared
/// (§5's behaviour exclusivity invariant) and must belong to the runtime
/// scheduling it — a behaviour over a private region, or one carrying a
/// `Region` handle from a different `Runtime`, is rejected at construction,
/// not at run time (where a cross-runtime id would otherwise only surface
/// as a lookup panic deep in `RegionTable`).
pub struct Behaviour {
    id: u64,
    regions: Vec<Region>,
    region_ids: Vec<RegionId>,
    body: Mutex<Option<BehaviourBody>>,
}

impl Behaviour {
    pub(crate) fn new(rt: &Arc<RuntimeInner>, mut regions: Vec<Region>, body: BehaviourBody) -> Result<Self> {
        if regions.is_empty() {
            return Err(BocError::isolation(
                "a behaviour must name at least one region",
            ));
        }

        regions.sort_by_key(|r| r.identity());
        regions.dedup_by_key(|r| r.identity());

        for region in &regions {
            if !Arc::ptr_eq(region.runtime(), rt) {
                return Err(BocError::isolation(
                    "behaviour named a region created by a different runtime",
                ));
            }
            if !region.is_shared() {
                return Err(BocError::isolation(format!(
                    "behaviour named a private region: {}",
                    region
                        .name()
                        .unwrap_or_else(|| region.identity().to_string())
                )));
            }
        }

        let region_ids = regions.iter().map(|r| r.id()).collect();
        Ok(Self {
            id: NEXT_BEHAVIOUR_ID.fetch_add(1, Ordering::Relaxed),
            regions,
            region_ids,
            body: Mutex::new(Some(body)),
        })
    }

    /// Builds a `Behaviour` with no real region handles, for acquisition
    /// bookkeeping tests that only need a distinct `Arc<Behaviour>` identity
    /// and a region-id set — not a working write barrier.
    #[cfg(test)]
    pub(crate) fn for_test(region_ids: Vec<RegionId>) -> Self {
        Self {
            id: NEXT_BEHAVIOUR_ID.fetch_add(1, Ordering::Relaxed),
            regions: Vec::new(),
            region_ids,
            body: Mutex::new(Some(Box::new(|_| {}))),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn region_ids(&self) -> &[RegionId] {
        &self.region_ids
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Runs the body once the acquisition protocol has opened every named
    /// region. Takes the closure out of its slot so a behaviour can never
    /// run twice, even if this is somehow called again.
    pub(crate) fn run(&self) {
        let body = self.body.lock().expect("behaviour body lock").take();
        if let Some(body) = body {
            body(&self.regions);
        }
    }
}

impl std::fmt::Debug for Behaviour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Behaviour")
            .field("id", &self.id)
            .field("region_ids", &self.region_ids)
            .finish()
    }
}
