//! Regions: named, independently lockable ownership containers (§4.2).
//!
//! A region is identified by a [`RegionId`] but that id can be superseded by
//! [`Region::merge`]: merging aliases one id onto another, and every lookup
//! resolves through a union-find table (`RegionTable::resolve`) so that
//! stale handles obtained before a merge keep working.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{BocError, LockResultExt, Result};
use crate::heap::ObjectId;
use crate::runtime::RuntimeInner;
use crate::scheduler::acquisition::Request;
use crate::value::{Primitive, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u64);

struct RegionState {
    root: ObjectId,
    name: Option<String>,
    parent: Option<RegionId>,
    shared: bool,
    open: bool,
    /// Pending behaviour acquisitions, only meaningful once `shared` (§4.5).
    /// The front of the queue is whichever request is currently "at head"
    /// for this region; a behaviour becomes runnable once it is at head of
    /// every region it named.
    fifo: VecDeque<Arc<Request>>,
}

struct RegionMeta {
    state: Mutex<RegionState>,
}

/// The region table: allocates ids, tracks each region's state, and
/// maintains the union-find alias map produced by merges.
pub struct RegionTable {
    next_id: AtomicU64,
    metas: Mutex<HashMap<RegionId, Arc<RegionMeta>>>,
    alias: Mutex<HashMap<RegionId, RegionId>>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            metas: Mutex::new(HashMap::new()),
            alias: Mutex::new(HashMap::new()),
        }
    }

    fn alloc_id(&self) -> RegionId {
        RegionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, id: RegionId, root: ObjectId, parent: Option<RegionId>) -> Arc<RegionMeta> {
        let meta = Arc::new(RegionMeta {
            state: Mutex::new(RegionState {
                root,
                name: None,
                parent,
                shared: false,
                open: false,
                fifo: VecDeque::new(),
            }),
        });
        self.metas
            .lock()
            .boc_lock()
            .expect("region table lock")
            .insert(id, meta.clone());
        self.alias
            .lock()
            .boc_lock()
            .expect("region alias lock")
            .insert(id, id);
        meta
    }

    /// Creates a fresh, private, top-level region with its own root object.
    pub fn create(&self, heap: &crate::heap::Heap) -> RegionId {
        let id = self.alloc_id();
        let root = heap.alloc_region_root(id);
        self.insert(id, root, None);
        id
    }

    /// Resolves `id` to its current canonical id, compressing the path.
    pub fn resolve(&self, id: RegionId) -> RegionId {
        let mut alias = self.alias.lock().boc_lock().expect("region alias lock");
        let mut cur = id;
        loop {
            match alias.get(&cur).copied() {
                Some(next) if next != cur => cur = next,
                _ => break,
            }
        }
        alias.insert(id, cur);
        cur
    }

    fn meta(&self, id: RegionId) -> Arc<RegionMeta> {
        let canonical = self.resolve(id);
        self.metas
            .lock()
            .boc_lock()
            .expect("region table lock")
            .get(&canonical)
            .cloned()
            .expect("region id is always present after creation or merge")
    }

    fn with_state<T>(&self, id: RegionId, f: impl FnOnce(&mut RegionState) -> T) -> T {
        let meta = self.meta(id);
        let mut state = meta.state.lock().boc_lock().expect("region state lock");
        f(&mut state)
    }

    pub fn root_of(&self, id: RegionId) -> ObjectId {
        self.with_state(id, |s| s.root)
    }

    pub fn is_open(&self, id: RegionId) -> bool {
        self.with_state(id, |s| s.open)
    }

    pub fn is_shared(&self, id: RegionId) -> bool {
        self.with_state(id, |s| s.shared)
    }

    pub fn parent_of(&self, id: RegionId) -> Option<RegionId> {
        self.with_state(id, |s| s.parent)
    }

    pub fn name_of(&self, id: RegionId) -> Option<String> {
        self.with_state(id, |s| s.name.clone())
    }

    pub fn set_name(&self, id: RegionId, name: String) {
        self.with_state(id, |s| s.name = Some(name));
    }

    /// Marks `id` open, failing if it is already open on some worker. Used
    /// by both the scoped RAII guard and the behaviour scheduler's
    /// acquisition protocol.
    pub fn try_open(&self, id: RegionId) -> Result<()> {
        self.with_state(id, |s| {
            if s.open {
                Err(BocError::isolation("region is already open"))
            } else {
                s.open = true;
                Ok(())
            }
        })
    }

    pub fn close(&self, id: RegionId) {
        self.with_state(id, |s| s.open = false);
    }

    /// Appends `request` to `id`'s acquisition queue. Returns `true` if the
    /// queue was empty beforehand, meaning `request` is now at the front —
    /// "at head" for this region, synchronously (§4.5 step 2).
    pub(crate) fn enqueue(&self, id: RegionId, request: Arc<Request>) -> bool {
        self.with_state(id, |s| {
            let was_empty = s.fifo.is_empty();
            s.fifo.push_back(request);
            was_empty
        })
    }

    /// Pops the current head of `id`'s acquisition queue (the request that
    /// just finished running and is releasing the region) and returns
    /// whichever request is now at the front, if any — the behaviour this
    /// release may have unblocked for this one region.
    pub(crate) fn release_head(&self, id: RegionId) -> Option<Arc<Request>> {
        self.with_state(id, |s| {
            s.fifo.pop_front();
            s.fifo.front().cloned()
        })
    }

    /// Sets `parent` as the containing region of `child`, but only if
    /// `child` is not already contained — a region's containing parent is
    /// fixed the first time it is stored into another region's field
    /// (§4.2's containment forest invariant), not reassignable afterwards.
    /// Also rejects the assignment if `parent` is already a descendant of
    /// `child` (walking `parent`'s own ancestor chain), since accepting it
    /// would close a cycle in what must stay a forest.
    pub fn set_contain_parent_if_unset(&self, child: RegionId, parent: RegionId) -> Result<()> {
        let child = self.resolve(child);
        let parent = self.resolve(parent);
        if child == parent {
            return Err(BocError::isolation("a region cannot contain itself"));
        }
        let mut cur = parent;
        let mut guard = 0;
        while let Some(ancestor) = self.parent_of(cur) {
            guard += 1;
            if guard > 10_000 {
                break; // containment forest corrupted into a cycle; bail out
            }
            let ancestor = self.resolve(ancestor);
            if ancestor == child {
                return Err(BocError::isolation(
                    "region is already an ancestor of the proposed parent",
                ));
            }
            cur = ancestor;
        }
        self.with_state(child, |s| {
            match s.parent {
                None => {
                    s.parent = Some(parent);
                    Ok(())
                }
                Some(existing) if existing == parent => Ok(()),
                Some(_) => Err(BocError::isolation(
                    "region is already contained by a different parent",
                )),
            }
        })
    }

    /// All regions transitively contained by `id` (including `id` itself),
    /// found by scanning the table for parent chains that resolve to `id`.
    /// A linear scan is fine here: a runtime is expected to host a modest,
    /// human-scale number of regions, not millions.
    fn descendants(&self, id: RegionId) -> Vec<RegionId> {
        let id = self.resolve(id);
        let all_ids: Vec<RegionId> = self
            .metas
            .lock()
            .boc_lock()
            .expect("region table lock")
            .keys()
            .copied()
            .collect();

        let mut result = vec![id];
        for candidate in all_ids {
            let candidate = self.resolve(candidate);
            if candidate == id {
                continue;
            }
            let mut cur = candidate;
            let mut is_descendant = false;
            let mut guard = 0;
            while let Some(parent) = self.parent_of(cur) {
                guard += 1;
                if guard > 10_000 {
                    break; // containment forest corrupted into a cycle; bail out
                }
                let parent = self.resolve(parent);
                if parent == id {
                    is_descendant = true;
                    break;
                }
                cur = parent;
            }
            if is_descendant {
                result.push(candidate);
            }
        }
        result
    }

    /// Makes `id` and every region it transitively contains shareable,
    /// refusing if any of them is currently open. Descendants are locked in
    /// ascending id order, the same deadlock-avoidance discipline used by
    /// the acquisition protocol, so this can never deadlock against a
    /// behaviour's multi-region acquire.
    pub fn make_shareable(&self, id: RegionId) -> Result<()> {
        let mut group = self.descendants(id);
        group.sort();
        group.dedup();

        let metas: Vec<Arc<RegionMeta>> = group.iter().map(|r| self.meta(*r)).collect();
        let mut guards = Vec::with_capacity(metas.len());
        for meta in &metas {
            let state = meta.state.lock().boc_lock().expect("region state lock");
            if state.open {
                return Err(BocError::isolation(
                    "cannot share a region while it or a descendant is open",
                ));
            }
            guards.push(state);
        }
        for guard in guards.iter_mut() {
            guard.shared = true;
        }
        Ok(())
    }

    /// Merges `from` into `into`: every object homed in `from` is rehomed to
    /// `into`, and `from`'s id is aliased onto `into` so future lookups by
    /// either id resolve to the same region. Per §4.2, both regions must
    /// already be open on the calling worker (either via a scoped `open` or
    /// because both are in the running behaviour's region set) — merging
    /// rewrites live objects' home pointers, so the caller must already hold
    /// exclusive access to both sides. Merging a region with itself (already
    /// aliased, directly or transitively) is a no-op success (§7).
    pub fn merge(
        &self,
        heap: &crate::heap::Heap,
        into: RegionId,
        from: RegionId,
        is_open_here: &dyn Fn(RegionId) -> bool,
    ) -> Result<()> {
        let into = self.resolve(into);
        let from = self.resolve(from);
        if into == from {
            return Ok(());
        }
        if !is_open_here(into) || !is_open_here(from) {
            return Err(BocError::isolation(
                "merge requires both regions to be open on the calling worker",
            ));
        }

        let (first, second) = if into < from { (into, from) } else { (from, into) };
        let first_meta = self.meta(first);
        let second_meta = self.meta(second);
        let mut first_state = first_meta.state.lock().boc_lock().expect("region state lock");
        let mut second_state = second_meta
            .state
            .lock()
            .boc_lock()
            .expect("region state lock");

        let (into_state, from_state): (&mut RegionState, &mut RegionState) = if first == into {
            (&mut first_state, &mut second_state)
        } else {
            (&mut second_state, &mut first_state)
        };

        let into_root = into_state.root;
        let from_root = from_state.root;
        for member in heap.members_of(from) {
            heap.rehome(member, into);
        }
        heap.merge_root_fields(into_root, from_root);
        into_state.shared = into_state.shared || from_state.shared;

        // `from`'s FIFO is about to become unreachable (future lookups by
        // either id resolve to `into`'s meta), so fold it into `into`'s now
        // rather than stranding whoever is still queued behind it. The
        // behaviour driving this merge (if any) must be at the front of
        // both queues already — §4.2 requires both regions open on the
        // calling worker — so its entry would otherwise appear twice.
        let mut from_fifo = std::mem::take(&mut from_state.fifo);
        if let (Some(into_front), Some(from_front)) = (into_state.fifo.front(), from_fifo.front())
        {
            if Arc::ptr_eq(into_front, from_front) {
                from_fifo.pop_front();
            }
        }
        into_state.fifo.extend(from_fifo);

        drop(first_state);
        drop(second_state);
        self.alias
            .lock()
            .boc_lock()
            .expect("region alias lock")
            .insert(from, into);
        Ok(())
    }

    /// Extracts `id`'s entire current membership (including its root) into a
    /// brand new region, leaving `id` with a fresh, empty root. Returns the
    /// new region's id. Like `merge`, this rewrites live objects' home
    /// pointers and so requires `id` to already be open on the calling
    /// worker. The new region starts shared if `id` was shared (the inverse
    /// of `merge`, which folds `shared` into the surviving region).
    pub fn detach_all(
        &self,
        heap: &crate::heap::Heap,
        id: RegionId,
        new_name: String,
        is_open_here: &dyn Fn(RegionId) -> bool,
    ) -> Result<RegionId> {
        let id = self.resolve(id);
        if !is_open_here(id) {
            return Err(BocError::isolation(
                "detach_all requires the region to be open on the calling worker",
            ));
        }
        let meta = self.meta(id);
        let mut state = meta.state.lock().boc_lock().expect("region state lock");

        let old_root = state.root;
        let new_id = self.alloc_id();
        let was_shared = state.shared;

        for member in heap.members_of(id) {
            heap.rehome(member, new_id);
        }
        let fresh_root = heap.alloc_region_root(id);
        state.root = fresh_root;
        drop(state);

        self.insert(new_id, old_root, None);
        self.set_name(new_id, new_name);
        if was_shared {
            self.make_shareable(new_id)?;
        }
        Ok(new_id)
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A live handle to a region, returned from [`crate::runtime::Runtime::region`]
/// and stored in object/region fields as [`Value::Region`].
#[derive(Clone)]
pub struct Region {
    id: RegionId,
    rt: Arc<RuntimeInner>,
}

impl Region {
    pub(crate) fn new(id: RegionId, rt: Arc<RuntimeInner>) -> Self {
        Self { id, rt }
    }

    pub(crate) fn id(&self) -> RegionId {
        self.rt.regions().resolve(self.id)
    }

    /// The runtime this handle belongs to, for callers that need to check a
    /// region was created by a particular runtime before trusting its id.
    pub(crate) fn runtime(&self) -> &Arc<RuntimeInner> {
        &self.rt
    }

    pub(crate) fn set_contain_parent_if_unset(&self, parent: RegionId) -> Result<()> {
        self.rt.regions().set_contain_parent_if_unset(self.id(), parent)
    }

    /// The region's user-assigned name, if any.
    pub fn name(&self) -> Option<String> {
        self.rt.regions().name_of(self.id())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.rt.regions().set_name(self.id(), name.into());
    }

    /// A stable identity value, usable in logs and equality checks; mirrors
    /// the dynamic `identity` read-only attribute.
    pub fn identity(&self) -> u64 {
        self.id().0
    }

    pub fn is_open(&self) -> bool {
        self.rt.regions().is_open(self.id())
    }

    pub fn is_shared(&self) -> bool {
        self.rt.regions().is_shared(self.id())
    }

    pub fn parent(&self) -> Option<Region> {
        self.rt
            .regions()
            .parent_of(self.id())
            .map(|p| Region::new(p, self.rt.clone()))
    }

    /// Reads a field of the region's own namespace. Requires the region to
    /// be open on the calling worker (checked at access time).
    pub fn get(&self, field: &str) -> Result<Option<Value>> {
        let root = self.rt.regions().root_of(self.id());
        self.rt.heap().read_field(root, field, &|r| self.rt.is_open_here(r))
    }

    /// Writes a field of the region's own namespace (§4.1's "target is a
    /// region" case). Requires the region to be open on the calling worker.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let root = self.rt.regions().root_of(self.id());
        self.rt
            .heap()
            .write_field(root, field, value.into(), &|r| self.rt.is_open_here(r))
    }

    /// Reads one of the region's own dynamic attributes by name, mirroring
    /// the host-facing `region.<attr>` read surface (§6) for a generic or
    /// reflective caller. Typed code should prefer the dedicated accessors
    /// (`name`, `identity`, `is_open`, `is_shared`, `parent`) instead.
    pub fn get_attr(&self, name: &str) -> Result<Value> {
        match name {
            "name" => Ok(self
                .name()
                .map(|n| Value::Primitive(Primitive::Str(n)))
                .unwrap_or(Value::Primitive(Primitive::Unit))),
            "identity" => Ok(Value::Primitive(Primitive::Int(self.identity() as i64))),
            "is_open" => Ok(Value::Primitive(Primitive::Bool(self.is_open()))),
            "is_shared" => Ok(Value::Primitive(Primitive::Bool(self.is_shared()))),
            "parent" => Ok(self
                .parent()
                .map(Value::Region)
                .unwrap_or(Value::Primitive(Primitive::Unit))),
            _ => Err(BocError::AttributeError(format!(
                "no such attribute: {name}"
            ))),
        }
    }

    /// Writes one of the region's own dynamic attributes by name. `name` is
    /// the only one that can actually change (§4.2); the rest are rejected
    /// with `AttributeError` since the public API exposes them with no
    /// setter at all, and a non-string value for `name` is rejected with
    /// `TypeError` — the two runtime checks a statically typed caller can
    /// never trigger (`set_name` takes `impl Into<String>`) but that a
    /// generic caller driving the region purely by attribute name can.
    pub fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        match name {
            "name" => match value {
                Value::Primitive(Primitive::Str(s)) => {
                    self.set_name(s);
                    Ok(())
                }
                _ => Err(BocError::TypeError(
                    "region name must be a string".to_owned(),
                )),
            },
            "identity" | "is_open" | "is_shared" | "parent" => Err(BocError::AttributeError(
                format!("{name} is a read-only region attribute"),
            )),
            _ => Err(BocError::AttributeError(format!(
                "no such attribute: {name}"
            ))),
        }
    }

    /// Opens the region for the duration of the returned guard (scoped,
    /// RAII, panic-safe via `Drop`). Used outside behaviour scheduling for
    /// direct, sequential access to a region.
    pub fn open(&self) -> Result<RegionGuard> {
        RegionGuard::open(self.clone())
    }

    /// Makes this region and everything it transitively contains shareable.
    pub fn make_shareable(&self) -> Result<()> {
        self.rt.regions().make_shareable(self.id())
    }

    /// Merges `other` into `self`; `other`'s id becomes an alias of `self`'s.
    /// Returns a handle to the merged region (observationally `self`) through
    /// which the moved members remain reachable by their original field
    /// names, per §6's `region.merge(other) → handle`.
    pub fn merge(&self, other: &Region) -> Result<Region> {
        self.rt.regions().merge(
            self.rt.heap(),
            self.id(),
            other.id(),
            &|r| self.rt.is_open_here(r),
        )?;
        Ok(Region::new(self.id(), self.rt.clone()))
    }

    /// Detaches this region's entire current membership into a new region
    /// with the given name and returns a handle to it.
    pub fn detach_all(&self, new_name: impl Into<String>) -> Result<Region> {
        let new_id = self.rt.regions().detach_all(
            self.rt.heap(),
            self.id(),
            new_name.into(),
            &|r| self.rt.is_open_here(r),
        )?;
        Ok(Region::new(new_id, self.rt.clone()))
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.rt, &other.rt) && self.id() == other.id()
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region").field("id", &self.id()).finish()
    }
}

/// A scoped, panic-safe open region. Closes the region when dropped.
pub struct RegionGuard {
    region: Region,
}

impl RegionGuard {
    fn open(region: Region) -> Result<Self> {
        let id = region.id();
        region.rt.regions().try_open(id)?;
        region.rt.mark_open_here(id);
        Ok(Self { region })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        let id = self.region.id();
        self.region.rt.regions().close(id);
        self.region.rt.unmark_open_here(id);
    }
}

/// Opens several regions at once, in ascending id order, to match the
/// acquisition protocol's deadlock-avoidance discipline even for direct,
/// non-behaviour callers.
pub struct MultiGuard {
    guards: Vec<RegionGuard>,
}

impl MultiGuard {
    pub fn open_all(regions: &[Region]) -> Result<Self> {
        let mut ordered: Vec<Region> = regions.to_vec();
        ordered.sort_by_key(|r| r.id().0);
        ordered.dedup_by_key(|r| r.id().0);

        let mut guards = Vec::with_capacity(ordered.len());
        for region in ordered {
            match region.open() {
                Ok(guard) => guards.push(guard),
                Err(e) => return Err(e), // guards drop here, closing what was opened so far
            }
        }
        Ok(Self { guards })
    }

    pub fn get(&self, index: usize) -> &Region {
        self.guards[index].region()
    }
}
