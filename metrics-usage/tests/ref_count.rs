use metrics_usage::{Metric as _, Registry};
use proptest::{collection::vec as arb_vec, prelude::*};

#[test]
fn dispose_and_reacquire() {
    let registry = Registry::new("test");
    assert!(!registry.is_valid_metric("test"));

    let histogram = registry.histogram("test");
    assert!(registry.is_valid_metric("test"));

    histogram.dispose();
    assert!(!registry.is_valid_metric("test"));

    let histogram = registry.histogram("test");
    assert!(registry.is_valid_metric("test"));

    histogram.dispose();
    assert!(!registry.is_valid_metric("test"));

    let first = registry.histogram("test");
    let second = registry.histogram("test");
    assert!(registry.is_valid_metric("test"));

    first.dispose();
    assert!(registry.is_valid_metric("test"));

    second.dispose();
    assert!(!registry.is_valid_metric("test"));
}

#[test]
fn concurrent_acquire_and_dispose() {
    let registry = Registry::new("test");
    let anchor = registry.meter("shared");

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                for _ in 0..500 {
                    let meter = registry.meter("shared");
                    meter.mark(1);
                    meter.dispose();
                }
            });
        }
    });

    assert!(registry.is_valid_metric("shared"));
    assert_eq!(metrics_usage::Rates::count(&anchor), 4_000);

    anchor.dispose();
    assert!(!registry.is_valid_metric("shared"));
}

#[derive(Clone, Debug)]
enum Op {
    Acquire,
    // Disposes the handle at this index among the live handles, wrapping around.
    Dispose(usize),
    // Disposes a handle that was already disposed.
    DisposeAgain,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Acquire),
        3 => any::<usize>().prop_map(Op::Dispose),
        1 => Just(Op::DisposeAgain),
    ]
}

proptest! {
    #[test]
    fn valid_while_any_handle_is_live(ops in arb_vec(arb_op(), 1..64)) {
        let registry = Registry::new("test");
        let mut live = Vec::new();
        let mut disposed = Vec::new();

        for op in ops {
            match op {
                Op::Acquire => live.push(registry.gauge("refcounted")),
                Op::Dispose(idx) => {
                    if !live.is_empty() {
                        let handle = live.swap_remove(idx % live.len());
                        handle.dispose();
                        disposed.push(handle);
                    }
                }
                Op::DisposeAgain => {
                    if let Some(handle) = disposed.last() {
                        handle.dispose();
                    }
                }
            }

            prop_assert_eq!(registry.is_valid_metric("refcounted"), !live.is_empty());
        }

        drop(live);
        prop_assert!(!registry.is_valid_metric("refcounted"));
    }
}
