//! Plain objects: the non-region half of the object graph (§4.1).

use std::sync::Arc;

use crate::error::Result;
use crate::heap::ObjectId;
use crate::runtime::RuntimeInner;
use crate::value::Value;

/// A live handle to a heap object, returned from [`crate::runtime::Runtime::object`]
/// and stored in fields as [`Value::Object`].
#[derive(Clone)]
pub struct Object {
    id: ObjectId,
    rt: Arc<RuntimeInner>,
}

impl Object {
    pub(crate) fn new(id: ObjectId, rt: Arc<RuntimeInner>) -> Self {
        Self { id, rt }
    }

    pub(crate) fn id(&self) -> ObjectId {
        self.id
    }

    /// Reads a field. If the object has been adopted into a region, this
    /// requires that region to be open on the calling worker.
    pub fn get(&self, field: &str) -> Result<Option<Value>> {
        self.rt
            .heap()
            .read_field(self.id, field, &|r| self.rt.is_open_here(r))
    }

    /// Writes a field, applying the write barrier: free-to-free writes are
    /// always allowed, writes into an object already adopted by a region
    /// require that region to be open, and assigning a free object makes it
    /// (and everything it transitively reaches) a member of that region.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.rt
            .heap()
            .write_field(self.id, field, value.into(), &|r| self.rt.is_open_here(r))
    }

    /// Whether this object has been adopted into a region yet.
    pub fn is_free(&self) -> bool {
        matches!(self.rt.heap().home_of(self.id), crate::heap::HomeRef::Free)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.rt, &other.rt) && self.id == other.id
    }
}
