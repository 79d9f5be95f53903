//! Execution monitors interrupting runaway handlers.

#![allow(clippy::disallowed_macros)]

mod common;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{add, calculator, interceptor, ints, real_add};
use jsintercept::{ContextState, Error, ExecutionMonitor, HostValue, Policy};

struct Deadline(Duration);

impl ExecutionMonitor for Deadline {
    fn get_monitor(&self) -> anyhow::Result<impl Future<Output = ()> + Send + 'static> {
        let limit = self.0;
        Ok(async move { jsintercept::monitor::sleep(limit).await })
    }

    fn name(&self) -> &'static str {
        "deadline"
    }
}

struct Unavailable(Arc<AtomicUsize>);

impl ExecutionMonitor for Unavailable {
    fn get_monitor(&self) -> anyhow::Result<impl Future<Output = ()> + Send + 'static> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err::<std::future::Pending<()>, _>(anyhow::anyhow!("cpu clock unavailable"))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

#[test]
fn runaway_handlers_are_interrupted_and_fall_back() {
    let interceptor = interceptor();
    let instrumented = interceptor
        .instrument(
            &calculator(),
            &add(),
            "(a, b) => { while (true) {} }",
            Policy::Replace,
        )
        .unwrap();
    let original = real_add();

    let start = Instant::now();
    let result = interceptor
        .dispatch_with_monitor(
            &instrumented.key,
            None,
            &ints(&[2, 3]),
            Some(&original.method),
            &Deadline(Duration::from_millis(100)),
        )
        .unwrap();
    assert_eq!(result, HostValue::Int(5));
    assert!(start.elapsed() < Duration::from_secs(10));

    let faults = interceptor.recent_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].kind, "interrupted");
    assert!(faults[0].fell_back);

    // an interrupted context is not reused
    assert_eq!(interceptor.context_state(instrumented.context), ContextState::Disposed);
}

#[test]
fn interrupted_handlers_without_an_original_report_the_interruption() {
    let interceptor = interceptor();
    let instrumented = interceptor
        .instrument(&calculator(), &add(), "(a, b) => { for (;;) {} }", Policy::Replace)
        .unwrap();

    let err = interceptor
        .dispatch_with_monitor(
            &instrumented.key,
            None,
            &ints(&[2, 3]),
            None,
            &Deadline(Duration::from_millis(50)),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Interrupted), "{err}");
}

#[test]
fn monitors_that_fail_to_start_keep_the_handler_from_running() {
    let interceptor = interceptor();
    let instrumented = interceptor
        .instrument(&calculator(), &add(), "(a, b) => a + b + 1", Policy::Replace)
        .unwrap();
    let original = real_add();
    let calls = Arc::new(AtomicUsize::new(0));

    let result = interceptor
        .dispatch_with_monitor(
            &instrumented.key,
            None,
            &ints(&[2, 3]),
            Some(&original.method),
            &Unavailable(calls.clone()),
        )
        .unwrap();
    // the original's answer, not the handler's
    assert_eq!(result, HostValue::Int(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let faults = interceptor.recent_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].kind, "engine");
    assert!(
        faults[0].message.contains("Execution monitor failed to start"),
        "{}",
        faults[0].message
    );
    // the context itself is fine
    assert_eq!(interceptor.context_state(instrumented.context), ContextState::Active);
}

#[test]
fn fast_handlers_finish_under_a_monitor() {
    let interceptor = interceptor();
    let instrumented = interceptor
        .instrument(&calculator(), &add(), "(a, b, original) => original() + 1", Policy::Around)
        .unwrap();
    let original = real_add();
    let deadline = Deadline(Duration::from_secs(30));

    for _ in 0..3 {
        let result = interceptor
            .dispatch_with_monitor(
                &instrumented.key,
                None,
                &ints(&[2, 3]),
                Some(&original.method),
                &deadline,
            )
            .unwrap();
        assert_eq!(result, HostValue::Int(6));
    }
    assert!(interceptor.recent_faults().is_empty());
}

#[cfg(feature = "monitor-wall-clock")]
mod wall_clock {
    use jsintercept::WallClockMonitor;

    use super::*;

    #[test]
    fn zero_timeouts_are_rejected() {
        assert!(WallClockMonitor::new(Duration::ZERO).is_err());
    }

    #[test]
    fn the_first_monitor_in_a_tuple_to_fire_wins() {
        let interceptor = interceptor();
        let instrumented = interceptor
            .instrument(
                &calculator(),
                &add(),
                "(a, b) => { while (true) {} }",
                Policy::Replace,
            )
            .unwrap();
        let original = real_add();
        let monitors = (
            WallClockMonitor::new(Duration::from_secs(60)).unwrap(),
            WallClockMonitor::new(Duration::from_millis(200)).unwrap(),
        );

        let start = Instant::now();
        let result = interceptor
            .dispatch_with_monitor(
                &instrumented.key,
                None,
                &ints(&[2, 3]),
                Some(&original.method),
                &monitors,
            )
            .unwrap();
        assert_eq!(result, HostValue::Int(5));
        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(interceptor.recent_faults()[0].kind, "interrupted");
    }

    #[test]
    fn a_later_dispatch_gets_a_fresh_context() {
        let interceptor = interceptor();
        let spin = interceptor
            .instrument(
                &calculator(),
                &add(),
                "(a, b) => { while (true) {} }",
                Policy::Replace,
            )
            .unwrap();
        let monitor = WallClockMonitor::new(Duration::from_millis(100)).unwrap();
        let original = real_add();
        interceptor
            .dispatch_with_monitor(&spin.key, None, &ints(&[1, 1]), Some(&original.method), &monitor)
            .unwrap();

        // handlers compiled afterwards land in a new context and run normally
        let negate = interceptor
            .instrument(
                &calculator(),
                &jsintercept::MethodSelector::new("negate", "(I)I"),
                "(a) => -a",
                Policy::Replace,
            )
            .unwrap();
        assert_ne!(negate.context, spin.context);
        let result = interceptor.dispatch_with_monitor(&negate.key, None, &ints(&[4]), None, &monitor);
        assert_eq!(result.unwrap(), HostValue::Int(-4));
    }
}
