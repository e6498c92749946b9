//! The object arena and the write barrier (§4.1).
//!
//! Every user-visible object — including the implicit "root object" that
//! backs each region's own field namespace — lives in one flat arena keyed
//! by [`ObjectId`]. Keeping regions and plain objects in the same table lets
//! the write barrier be a single function instead of one code path for
//! "assign into a region" and another for "assign into an object".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::{BocError, LockResultExt, Result};
use crate::region::RegionId;
use crate::value::Value;

/// Opaque, globally unique identifier for an object in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

/// Where an object currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeRef {
    /// Not yet owned by any region.
    Free,
    Region(RegionId),
}

struct ObjectRecord {
    home: HomeRef,
    fields: HashMap<String, Value>,
}

/// The flat object arena backing every region and object handle.
pub struct Heap {
    next_id: AtomicU64,
    objects: Mutex<HashMap<ObjectId, ObjectRecord>>,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a new, free object with no fields.
    pub fn alloc(&self) -> ObjectId {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut objects = self.objects.lock().boc_lock().expect("heap lock");
        objects.insert(
            id,
            ObjectRecord {
                home: HomeRef::Free,
                fields: HashMap::new(),
            },
        );
        id
    }

    /// Allocates a region's root object, whose home is the region itself
    /// from the moment it is created (a region is never "free").
    pub fn alloc_region_root(&self, owner: RegionId) -> ObjectId {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut objects = self.objects.lock().boc_lock().expect("heap lock");
        objects.insert(
            id,
            ObjectRecord {
                home: HomeRef::Region(owner),
                fields: HashMap::new(),
            },
        );
        id
    }

    pub fn home_of(&self, id: ObjectId) -> HomeRef {
        let objects = self.objects.lock().boc_lock().expect("heap lock");
        objects
            .get(&id)
            .map(|r| r.home)
            .unwrap_or(HomeRef::Free)
    }

    /// Reads a field, applying the same region-open check as the write
    /// barrier: a field homed in a region is only visible while that region
    /// is open on the calling worker (the "escape" case in §4.1 is detected
    /// here, at access time, rather than when the reference was first
    /// bound).
    pub fn read_field(
        &self,
        target: ObjectId,
        field: &str,
        current: &dyn Fn(RegionId) -> bool,
    ) -> Result<Option<Value>> {
        match self.home_of(target) {
            HomeRef::Free => Ok(self.get_field_raw(target, field)),
            HomeRef::Region(home_region) => {
                if !current(home_region) {
                    return Err(BocError::isolation("region not open on this worker"));
                }
                Ok(self.get_field_raw(target, field))
            }
        }
    }

    fn get_field_raw(&self, id: ObjectId, field: &str) -> Option<Value> {
        let objects = self.objects.lock().boc_lock().expect("heap lock");
        objects.get(&id).and_then(|r| r.fields.get(field).cloned())
    }

    /// The write barrier (§4.1). `target` is the object whose field is being
    /// assigned (a region's own root object when the caller wrote
    /// `region.field = value`). `current` reports whether a given region is
    /// open on the calling worker.
    pub fn write_field(
        &self,
        target: ObjectId,
        field: &str,
        value: Value,
        current: &dyn Fn(RegionId) -> bool,
    ) -> Result<()> {
        let target_home = self.home_of(target);

        match target_home {
            HomeRef::Free => {
                // Free-to-free assignment is the bootstrapping case: no
                // region is involved yet, so no open-region check applies.
                // The transitive closure is homed later, when `target`
                // itself is assigned into some region's field.
                self.set_field_raw(target, field, value);
                Ok(())
            }
            HomeRef::Region(home_region) => {
                if !current(home_region) {
                    return Err(BocError::isolation("region not open on this worker"));
                }
                self.apply_owned_write(target, field, value, home_region)
            }
        }
    }

    fn apply_owned_write(
        &self,
        target: ObjectId,
        field: &str,
        value: Value,
        home_region: RegionId,
    ) -> Result<()> {
        match &value {
            Value::Primitive(_) => {
                self.set_field_raw(target, field, value);
                Ok(())
            }
            Value::Region(region) => {
                region.set_contain_parent_if_unset(home_region)?;
                self.set_field_raw(target, field, value);
                Ok(())
            }
            Value::Object(obj) => {
                let obj_id = obj.id();
                match self.home_of(obj_id) {
                    HomeRef::Free => {
                        self.adopt_closure(obj_id, home_region)?;
                        self.set_field_raw(target, field, value);
                        Ok(())
                    }
                    HomeRef::Region(existing) if existing == home_region => {
                        self.set_field_raw(target, field, value);
                        Ok(())
                    }
                    HomeRef::Region(_) => Err(BocError::isolation(
                        "object already owned by a different region",
                    )),
                }
            }
        }
    }

    fn set_field_raw(&self, target: ObjectId, field: &str, value: Value) {
        let mut objects = self.objects.lock().boc_lock().expect("heap lock");
        if let Some(record) = objects.get_mut(&target) {
            record.fields.insert(field.to_owned(), value);
        }
    }

    /// Sets the home of `root` and every free object transitively reachable
    /// from it (through `Value::Object` fields) to `region`. A free object
    /// can hold a field pointing at an object already homed elsewhere — set
    /// while both were still unreached from any region — so this walks the
    /// whole closure read-only first and fails the entire adoption if it
    /// finds one homed to a *different* region, instead of silently stopping
    /// the walk at it and leaving that reference live. An object already
    /// homed to `region` itself is left as-is and not re-descended into (it
    /// was already adopted through this same closure, or created there).
    fn adopt_closure(&self, root: ObjectId, region: RegionId) -> Result<()> {
        let mut objects = self.objects.lock().boc_lock().expect("heap lock");

        let mut to_adopt = Vec::new();
        let mut stack = vec![root];
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(record) = objects.get(&id) else {
                continue;
            };
            match record.home {
                HomeRef::Region(home) if home == region => continue,
                HomeRef::Region(_) => {
                    return Err(BocError::isolation(
                        "object reachable through a free-object chain is already owned by a different region",
                    ));
                }
                HomeRef::Free => {}
            }
            to_adopt.push(id);
            for value in record.fields.values() {
                if let Value::Object(child) = value {
                    stack.push(child.id());
                }
            }
        }

        for id in to_adopt {
            if let Some(record) = objects.get_mut(&id) {
                record.home = HomeRef::Region(region);
            }
        }
        Ok(())
    }

    /// Rewrites the home of `id` directly, used by `merge`/`detach_all` to
    /// move an already-homed object between regions.
    pub(crate) fn rehome(&self, id: ObjectId, region: RegionId) {
        let mut objects = self.objects.lock().boc_lock().expect("heap lock");
        if let Some(record) = objects.get_mut(&id) {
            record.home = HomeRef::Region(region);
        }
    }

    /// All objects currently homed to `region`, used by `merge` (to move a
    /// whole membership set) and `detach_all` (to extract one).
    pub(crate) fn members_of(&self, region: RegionId) -> Vec<ObjectId> {
        let objects = self.objects.lock().boc_lock().expect("heap lock");
        objects
            .iter()
            .filter_map(|(id, record)| match record.home {
                HomeRef::Region(r) if r == region => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Folds `from`'s fields into `into`'s, so that a field set directly on
    /// the consumed region's own root (via `Region::set`) remains reachable
    /// through the surviving region's field namespace after a merge, per
    /// §4.2's "returns a handle through which the merged objects' original
    /// field values are reachable." `into`'s existing fields win on a name
    /// collision, since `into` is the surviving side of the merge.
    pub(crate) fn merge_root_fields(&self, into: ObjectId, from: ObjectId) {
        let mut objects = self.objects.lock().boc_lock().expect("heap lock");
        let Some(from_fields) = objects.get(&from).map(|r| r.fields.clone()) else {
            return;
        };
        if let Some(into_record) = objects.get_mut(&into) {
            for (field, value) in from_fields {
                into_record.fields.entry(field).or_insert(value);
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
