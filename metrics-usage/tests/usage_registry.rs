use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant, UNIX_EPOCH},
};

use metrics_usage::{
    close_signal, BuildError, HandlerError, IntervalLength, MetricsMessage, UsageEventHandler,
    UsageRegistry, UsageSource,
};
use mockall::mock;

mock! {
    Handler {}

    impl UsageEventHandler for Handler {
        fn accept_metrics(&self, message: MetricsMessage) -> Result<(), HandlerError>;
    }
}

struct Link;

impl UsageSource for Link {
    fn interval_id(&self) -> &str {
        "link-1"
    }

    fn tags(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn flush_to_handler_without_metrics() {
    let registry = UsageRegistry::new("test");

    let mut handler = MockHandler::new();
    handler.expect_accept_metrics().never();

    registry.flush_to_handler(&handler);
}

#[test]
fn flush_to_handler_with_histogram() {
    let registry = UsageRegistry::builder("test").with_tag("zone", "a").build().expect("valid");
    let histogram = registry.histogram("histogram");
    histogram.update(10);

    let mut handler = MockHandler::new();
    handler
        .expect_accept_metrics()
        .withf(|message| {
            let histogram = &message.histograms["histogram"];
            message.source_id == "test"
                && message.tags.get("zone").map(String::as_str) == Some("a")
                && histogram.min == 10
                && histogram.max == 10
        })
        .times(1)
        .returning(|_| Ok(()));

    registry.flush_to_handler(&handler);
}

#[test]
fn handler_errors_are_contained() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let registry = UsageRegistry::new("test");
    let gauge = registry.gauge("gauge");
    gauge.update(1);

    let mut handler = MockHandler::new();
    handler.expect_accept_metrics().times(2).returning(|_| Err("handler unavailable".into()));

    registry.flush_to_handler(&handler);
    registry.flush_to_handler(&handler);
}

#[test]
fn poll_without_usage_metrics_leaves_intervals() {
    let registry = UsageRegistry::new("test");
    let gauge = registry.gauge("gauge");
    let counter = registry.usage_counter("usage", IntervalLength::from_secs(1).expect("valid"));
    gauge.update(5);
    counter.update(&Link, "bytes", UNIX_EPOCH + Duration::from_secs(10), 64);

    let message = registry.poll_without_usage_metrics().expect("gauge value");
    assert_eq!(message.int_values.get("gauge"), Some(&5));
    assert!(message.usage_counters.is_empty());

    let message = registry.flush_and_poll().expect("gauge value and interval");
    assert_eq!(message.usage_counters.len(), 1);
    assert_eq!(message.usage_counters[0].interval_start_utc(), 10);
}

#[test]
fn usage_counter_keeps_first_interval_length() {
    let registry = UsageRegistry::new("test");
    let first = registry.usage_counter("usage", IntervalLength::from_secs(60).expect("valid"));
    let second = registry.usage_counter("usage", IntervalLength::from_secs(5).expect("valid"));

    assert_eq!(first.interval_length().as_secs(), 60);
    assert_eq!(second.interval_length().as_secs(), 60);
}

#[test]
fn start_reporting_validation() {
    let registry = UsageRegistry::new("test");
    let handler: Arc<dyn UsageEventHandler> = Arc::new(MockHandler::new());

    let result = registry.start_reporting(Arc::clone(&handler), Duration::ZERO);
    assert!(matches!(result, Err(BuildError::InvalidReportInterval)));

    let task = registry
        .start_reporting(Arc::clone(&handler), Duration::from_secs(3600))
        .expect("first start should succeed");
    let result = registry.start_reporting(handler, Duration::from_secs(3600));
    assert!(matches!(result, Err(BuildError::AlreadyReporting)));

    registry.close();
    task.join().expect("background threads should not panic");
}

#[test]
fn reporting_delivers_until_closed() {
    let (closer, close) = close_signal();
    let registry =
        UsageRegistry::builder("test").with_close_notify(close).build().expect("valid");
    let gauge = registry.gauge("gauge");
    gauge.update(3);

    let delivered = Arc::new(AtomicUsize::new(0));
    let mut handler = MockHandler::new();
    let counter = Arc::clone(&delivered);
    handler.expect_accept_metrics().returning(move |message| {
        assert_eq!(message.int_values.get("gauge"), Some(&3));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let task = registry
        .start_reporting(Arc::new(handler), Duration::from_millis(10))
        .expect("should start reporting");
    assert!(wait_until(|| delivered.load(Ordering::SeqCst) >= 2));

    // An externally owned signal is not fired by the registry itself.
    registry.close();
    assert!(!registry.close_notify().is_closed());

    closer.close();
    task.join().expect("background threads should not panic");

    assert!(!registry.is_valid_metric("gauge"));
    assert!(registry.is_empty());
}

#[test]
fn full_queue_drops_messages() {
    let registry = UsageRegistry::builder("test").with_event_queue_size(1).build().expect("valid");
    let gauge = registry.gauge("gauge");
    gauge.update(1);

    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    let calls = Arc::new(AtomicUsize::new(0));
    let mut handler = MockHandler::new();
    let counter = Arc::clone(&calls);
    handler.expect_accept_metrics().returning(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = gate.recv();
        Ok(())
    });

    let task = registry
        .start_reporting(Arc::new(handler), Duration::from_millis(5))
        .expect("should start reporting");
    assert!(wait_until(|| calls.load(Ordering::SeqCst) == 1));

    // The handler is stuck on its first message, so ticks keep overflowing the queue. The
    // reporting loop must still observe the close signal.
    std::thread::sleep(Duration::from_millis(50));
    registry.close();
    assert!(wait_until(|| !registry.is_valid_metric("gauge")));

    drop(release);
    task.join().expect("background threads should not panic");
    assert!(calls.load(Ordering::SeqCst) <= 2);
}
