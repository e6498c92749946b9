//! End-to-end scheduler scenarios (§8): the swap test, cross-region
//! parallelism, per-region FIFO ordering, and quiescence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use boc::Runtime;

#[test]
fn swap_between_two_shared_regions() {
    let rt = Runtime::new();
    let a = rt.region();
    let b = rt.region();

    {
        let _guard = boc::MultiGuard::open_all(&[a.clone(), b.clone()]).unwrap();
        a.set("balance", 100i64).unwrap();
        b.set("balance", 0i64).unwrap();
    }

    a.make_shareable().unwrap();
    b.make_shareable().unwrap();

    let swap_a = a.clone();
    let swap_b = b.clone();
    rt.when(vec![a.clone(), b.clone()], move |regions| {
        let ra = regions.iter().find(|r| *r == &swap_a).unwrap();
        let rb = regions.iter().find(|r| *r == &swap_b).unwrap();
        let av = ra.get("balance").unwrap().unwrap();
        let bv = rb.get("balance").unwrap().unwrap();
        ra.set("balance", bv.as_primitive().cloned().unwrap()).unwrap();
        rb.set("balance", av.as_primitive().cloned().unwrap()).unwrap();
    })
    .unwrap();

    let check_a = a.clone();
    let check_b = b.clone();
    let observed = Arc::new(Mutex::new(None));
    let observed_writer = observed.clone();
    rt.when(vec![a.clone(), b.clone()], move |regions| {
        let ra = regions.iter().find(|r| *r == &check_a).unwrap();
        let rb = regions.iter().find(|r| *r == &check_b).unwrap();
        let av = ra.get("balance").unwrap().unwrap();
        let bv = rb.get("balance").unwrap().unwrap();
        *observed_writer.lock().unwrap() = Some((
            av.as_primitive().cloned().unwrap(),
            bv.as_primitive().cloned().unwrap(),
        ));
    })
    .unwrap();

    rt.wait();

    let (av, bv) = observed.lock().unwrap().clone().unwrap();
    assert_eq!(av, boc::Primitive::Int(0));
    assert_eq!(bv, boc::Primitive::Int(100));
}

#[test]
fn disjoint_regions_run_in_parallel() {
    let rt = Runtime::new();
    let worker_count = rt.worker_count().max(2);
    let regions: Vec<_> = (0..worker_count)
        .map(|_| {
            let r = rt.region();
            r.make_shareable().unwrap();
            r
        })
        .collect();

    let intervals: Arc<Mutex<Vec<(Instant, Instant)>>> = Arc::new(Mutex::new(Vec::new()));

    for region in &regions {
        let intervals = intervals.clone();
        rt.when(vec![region.clone()], move |_| {
            let start = Instant::now();
            // CPU-bound busy loop, long enough that overlap is observable.
            let mut acc: u64 = 0;
            while start.elapsed() < Duration::from_millis(80) {
                acc = acc.wrapping_add(1);
            }
            std::hint::black_box(acc);
            let end = Instant::now();
            intervals.lock().unwrap().push((start, end));
        })
        .unwrap();
    }

    rt.wait();

    let intervals = intervals.lock().unwrap();
    assert_eq!(intervals.len(), worker_count);

    let overlapping_pairs = intervals
        .iter()
        .enumerate()
        .flat_map(|(i, a)| intervals.iter().skip(i + 1).map(move |b| (a, b)))
        .filter(|(a, b)| a.0 < b.1 && b.0 < a.1)
        .count();

    assert!(
        overlapping_pairs >= 2,
        "expected at least two overlapping behaviour intervals, saw {overlapping_pairs} among {intervals:?}"
    );
}

#[test]
fn behaviours_sharing_a_region_run_in_submission_order() {
    let rt = Runtime::new();
    let region = rt.region();
    region.make_shareable().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..20u64 {
        let order = order.clone();
        rt.when(vec![region.clone()], move |_| {
            order.lock().unwrap().push(i);
        })
        .unwrap();
    }
    rt.wait();

    let order = order.lock().unwrap();
    let expected: Vec<u64> = (0..20).collect();
    assert_eq!(*order, expected);
}

#[test]
fn overlapping_behaviours_never_run_concurrently() {
    let rt = Runtime::new();
    let a = rt.region();
    let b = rt.region();
    let c = rt.region();
    a.make_shareable().unwrap();
    b.make_shareable().unwrap();
    c.make_shareable().unwrap();

    let active = Arc::new(AtomicUsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    // Every behaviour touches `b`, so none of these twenty overlap.
    for pair in [vec![a.clone(), b.clone()], vec![b.clone(), c.clone()]]
        .into_iter()
        .cycle()
        .take(20)
    {
        let active = active.clone();
        let violations = violations.clone();
        rt.when(pair, move |_| {
            if active.fetch_add(1, Ordering::SeqCst) != 0 {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    rt.wait();
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn merging_regions_from_inside_a_running_behaviour_releases_every_waiter_exactly_once() {
    let rt = Runtime::new();
    let a = rt.region();
    let b = rt.region();
    a.make_shareable().unwrap();
    b.make_shareable().unwrap();

    // The merge behaviour waits for a signal before merging, so the two
    // single-region behaviours below are guaranteed to be enqueued on `a`'s
    // and `b`'s still-distinct FIFOs before the merge aliases one onto the
    // other.
    let (merge_tx, merge_rx) = std::sync::mpsc::channel::<()>();
    let merge_a = a.clone();
    let merge_b = b.clone();
    rt.when(vec![a.clone(), b.clone()], move |regions| {
        let ra = regions.iter().find(|r| *r == &merge_a).unwrap();
        let rb = regions.iter().find(|r| *r == &merge_b).unwrap();
        merge_rx.recv().unwrap();
        ra.merge(rb).unwrap();
    })
    .unwrap();

    let ran_on_a = Arc::new(AtomicUsize::new(0));
    let ran_on_a_writer = ran_on_a.clone();
    rt.when(vec![a.clone()], move |_| {
        ran_on_a_writer.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let ran_on_b = Arc::new(AtomicUsize::new(0));
    let ran_on_b_writer = ran_on_b.clone();
    rt.when(vec![b.clone()], move |_| {
        ran_on_b_writer.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    merge_tx.send(()).unwrap();
    rt.wait();

    // Neither waiter may be dropped (starved behind an orphaned queue) nor
    // run twice (double-released through the same physical region).
    assert_eq!(ran_on_a.load(Ordering::SeqCst), 1);
    assert_eq!(ran_on_b.load(Ordering::SeqCst), 1);
}

#[test]
fn wait_returns_only_once_quiescent() {
    let rt = Runtime::new();
    let region = rt.region();
    region.make_shareable().unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let ran = ran.clone();
        rt.when(vec![region.clone()], move |_| {
            ran.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    rt.wait();
    assert_eq!(ran.load(Ordering::SeqCst), 5);

    // A second `wait()` with nothing in flight must return immediately.
    rt.wait();
}
