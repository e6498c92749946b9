//! Region isolation scenarios (§8): writes outside an open region, reads
//! across an escaped reference, and the region-ownership invariant.

use boc::{BocError, Runtime};

#[test]
fn writing_into_a_closed_region_fails_and_leaves_it_unchanged() {
    let rt = Runtime::new();
    let region = rt.region();

    {
        let _guard = region.open().unwrap();
        region.set("count", 1i64).unwrap();
    }

    // The guard dropped, closing the region; writing now must fail.
    let err = region.set("count", 2i64).unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));

    // And the prior value must be untouched.
    let _guard = region.open().unwrap();
    let value = region.get("count").unwrap().unwrap();
    assert_eq!(value.as_primitive().cloned(), Some(boc::Primitive::Int(1)));
}

#[test]
fn reading_an_object_escaped_from_its_home_region_fails() {
    let rt = Runtime::new();
    let region = rt.region();
    let obj = rt.object();

    {
        let _guard = region.open().unwrap();
        region.set("child", obj.clone()).unwrap();
    }

    // `obj` is now homed in `region`, which is closed again. Accessing it
    // directly, without the region open, must be rejected rather than
    // silently reading stale data.
    let err = obj.get("anything").unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));
}

#[test]
fn assigning_an_already_owned_object_to_a_different_region_fails() {
    let rt = Runtime::new();
    let a = rt.region();
    let b = rt.region();
    let obj = rt.object();

    {
        let _guard = boc::MultiGuard::open_all(&[a.clone()]).unwrap();
        a.set("child", obj.clone()).unwrap();
    }

    let _guard = boc::MultiGuard::open_all(&[a.clone(), b.clone()]).unwrap();
    let err = b.set("child", obj.clone()).unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));
}

#[test]
fn a_region_assigned_as_a_field_gets_a_fixed_containing_parent() {
    let rt = Runtime::new();
    let parent_a = rt.region();
    let parent_b = rt.region();
    let child = rt.region();

    {
        let _guard = boc::MultiGuard::open_all(&[parent_a.clone(), child.clone()]).unwrap();
        parent_a.set("sub", child.clone()).unwrap();
    }
    assert_eq!(child.parent().unwrap(), parent_a);

    // A second region trying to claim the same child as its own field must
    // fail: once a region is contained, its containing parent is fixed.
    let _guard = boc::MultiGuard::open_all(&[parent_b.clone(), child.clone()]).unwrap();
    let err = parent_b.set("sub", child.clone()).unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));
}

#[test]
fn behaviour_over_a_private_region_is_rejected_at_submission() {
    let rt = Runtime::new();
    let region = rt.region();
    // Never called `make_shareable`.
    let err = rt.when(vec![region], |_| {}).unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));
}

#[test]
fn behaviour_over_an_empty_region_set_is_rejected() {
    let rt = Runtime::new();
    let err = rt.when(vec![], |_| {}).unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));
}

#[test]
fn behaviour_naming_a_region_from_a_different_runtime_is_rejected() {
    let rt1 = Runtime::new();
    let rt2 = Runtime::new();
    let region = rt1.region();
    region.make_shareable().unwrap();

    let err = rt2.when(vec![region], |_| {}).unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));
}

#[test]
fn region_containment_cannot_form_a_two_region_cycle() {
    let rt = Runtime::new();
    let a = rt.region();
    let b = rt.region();

    {
        let _guard = boc::MultiGuard::open_all(&[a.clone(), b.clone()]).unwrap();
        a.set("child", b.clone()).unwrap();
    }
    assert_eq!(b.parent().unwrap(), a);

    // `b` is already contained by `a`; making `a` contained by `b` in turn
    // would close a cycle, and must be rejected rather than silently
    // accepted because `a` itself has no parent yet.
    let _guard = boc::MultiGuard::open_all(&[a.clone(), b.clone()]).unwrap();
    let err = b.set("child", a.clone()).unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));
    assert!(a.parent().is_none());
}

#[test]
fn adopting_a_free_object_fails_if_it_transitively_reaches_an_already_owned_object() {
    let rt = Runtime::new();
    let r1 = rt.region();
    let r2 = rt.region();
    let anchor = rt.object();
    let middle = rt.object();

    {
        let _guard = r2.open().unwrap();
        r2.set("anchor", anchor.clone()).unwrap();
    }
    // `anchor` is now homed in `r2`. `middle` is still free and is free to
    // point at it — the write barrier only checks `middle`'s own home here,
    // not transitively what it reaches.
    middle.set("next", anchor.clone()).unwrap();

    // Later, adopting `middle` into an unrelated region must fail instead of
    // silently stopping its closure walk at the already-owned `anchor` and
    // leaving a live cross-region reference behind.
    let _guard = r1.open().unwrap();
    let err = r1.set("entry", middle.clone()).unwrap_err();
    assert!(matches!(err, BocError::RegionIsolation(_)));
    assert!(middle.is_free());
}
