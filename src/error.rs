//! The user-visible error taxonomy.
//!
//! Every fallible entry point in this crate returns a [`BocError`] rather than
//! panicking. A panic is reserved for violated internal invariants (a poisoned
//! lock, a corrupt union-find node) that indicate a bug in the runtime itself,
//! not a misuse of the public API.

/// Errors surfaced to callers of the region/behaviour API.
///
/// This mirrors the three-way exception taxonomy of the embedding this crate
/// is modelled on (`RegionIsolationError`, `TypeError`, `AttributeError`),
/// collapsed into a single enum the way a systems API typically exposes one
/// error type per crate rather than one exception class per violation.
#[derive(Debug, thiserror::Error)]
pub enum BocError {
    /// Any violation of the region isolation invariants: writing into a
    /// region that is not open on the calling worker, reading a value whose
    /// home has escaped its open scope, assigning an object that already
    /// belongs to a different region, or naming a private region in a
    /// behaviour's region set.
    #[error("region isolation violation: {0}")]
    RegionIsolation(String),

    /// A value of the wrong dynamic type was assigned to a slot that
    /// requires a specific type. Unreachable through the statically typed
    /// `Region::set_name(impl Into<String>)`, but raised by
    /// `Region::set_attr("name", ...)` when a generic caller supplies a
    /// non-string [`crate::Value`], mirroring the embedding this crate is
    /// modelled on rejecting a non-string `region.name` assignment.
    #[error("type error: {0}")]
    TypeError(String),

    /// An attempt to write a read-only region attribute (`identity`,
    /// `is_open`, `is_shared`, `parent`) through `Region::set_attr`, or to
    /// read/write an attribute name the region doesn't have. The typed
    /// accessors for these attributes have no setter at all, so a typed
    /// caller is rejected at compile time instead.
    #[error("attribute error: {0}")]
    AttributeError(String),

    /// An internal lock was poisoned by a panicking holder. Surfaced rather
    /// than silently swallowed, so a bug in one behaviour cannot be mistaken
    /// for a transient failure in another.
    #[error("internal lock poisoned: {0}")]
    Poisoned(String),
}

impl BocError {
    pub(crate) fn isolation(msg: impl Into<String>) -> Self {
        BocError::RegionIsolation(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BocError>;

/// Adapts a poisoned-lock error into a [`BocError::Poisoned`] instead of
/// propagating the panic, matching §7's requirement that a panicking
/// behaviour must not corrupt the runtime for everyone else.
pub(crate) trait LockResultExt<T> {
    fn boc_lock(self) -> Result<T>;
}

impl<T> LockResultExt<T> for std::result::Result<T, std::sync::PoisonError<T>> {
    fn boc_lock(self) -> Result<T> {
        self.map_err(|e| BocError::Poisoned(e.to_string()))
    }
}

/// Extracts a human-readable message from a `catch_unwind` payload, for
/// logging a behaviour's panic without propagating it.
pub(crate) fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
