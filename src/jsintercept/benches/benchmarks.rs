use std::sync::Arc;
use std::time::Duration;

use criterion::{Bencher, Criterion, criterion_group, criterion_main};
use jsintercept::{
    HostValue, InterceptionKey, InterceptorBuilder, MethodSelector, OriginalMethod, Policy,
    TypeDescriptor,
};

const CALCULATOR: &str = "com/example/Calculator";

fn add() -> MethodSelector {
    MethodSelector::new("add", "(II)I")
}

fn original_add() -> OriginalMethod {
    Arc::new(|args: &[HostValue]| match args {
        [HostValue::Int(a), HostValue::Int(b)] => Ok(HostValue::Int(a + b)),
        _ => Ok(HostValue::Int(0)),
    })
}

fn no_op_weaver(
    class: &TypeDescriptor,
    _method: &MethodSelector,
    _key: &InterceptionKey,
) -> anyhow::Result<Vec<u8>> {
    Ok(class.bytes().to_vec())
}

fn instrument_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("instrument");

    group.bench_function("instrument_and_revoke", |b: &mut Bencher<'_>| {
        let interceptor = InterceptorBuilder::new().build(no_op_weaver).unwrap();
        let class = TypeDescriptor::new(CALCULATOR, Vec::new());
        let method = add();

        b.iter(|| {
            interceptor
                .instrument(&class, &method, "(a, b) => a + b", Policy::Replace)
                .unwrap();
            interceptor.revoke(CALCULATOR, &method).unwrap();
        });
    });

    group.finish();
}

fn dispatch_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let class = TypeDescriptor::new(CALCULATOR, Vec::new());
    let args = [HostValue::Int(2), HostValue::Int(3)];
    let original = original_add();

    // Baseline: no handler registered, straight to the original.
    group.bench_function("pass_through", |b: &mut Bencher<'_>| {
        let interceptor = InterceptorBuilder::new().build(no_op_weaver).unwrap();
        let key = InterceptionKey::new(CALCULATOR, &add()).unwrap();

        b.iter(|| interceptor.dispatch(&key, None, &args, Some(&original)).unwrap());
    });

    let policies = [
        ("replace", "(a, b) => a + b + 1", Policy::Replace),
        ("before", "(a, b) => {}", Policy::Before),
        ("after", "(a, b, r) => r * 2", Policy::After),
        ("around", "(a, b, original) => original() + 1", Policy::Around),
    ];
    for (name, script, policy) in policies {
        group.bench_function(name, |b: &mut Bencher<'_>| {
            let interceptor = InterceptorBuilder::new().build(no_op_weaver).unwrap();
            let key = interceptor
                .instrument(&class, &add(), script, policy)
                .unwrap()
                .key;

            b.iter(|| interceptor.dispatch(&key, None, &args, Some(&original)).unwrap());
        });
    }

    group.finish();
}

// =============================================================================
// Monitor overhead benchmark
// =============================================================================
// Cost of arming a monitor on a handler that finishes well within its limit.
#[cfg(feature = "monitor-wall-clock")]
fn monitor_overhead_benchmark(c: &mut Criterion) {
    use jsintercept::WallClockMonitor;

    let mut group = c.benchmark_group("monitor_overhead");
    let class = TypeDescriptor::new(CALCULATOR, Vec::new());
    let args = [HostValue::Int(2), HostValue::Int(3)];
    let interceptor = InterceptorBuilder::new().build(no_op_weaver).unwrap();
    let key = interceptor
        .instrument(&class, &add(), "(a, b) => a + b + 1", Policy::Replace)
        .unwrap()
        .key;

    group.bench_function("dispatch_no_monitor", |b: &mut Bencher<'_>| {
        b.iter(|| interceptor.dispatch(&key, None, &args, None).unwrap());
    });

    group.bench_function("dispatch_wall_clock", |b: &mut Bencher<'_>| {
        let monitor = WallClockMonitor::new(Duration::from_secs(5)).unwrap();
        b.iter(|| {
            interceptor
                .dispatch_with_monitor(&key, None, &args, None, &monitor)
                .unwrap()
        });
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = instrument_benchmark, dispatch_benchmark
}

#[cfg(feature = "monitor-wall-clock")]
criterion_group! {
    name = monitor_benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = monitor_overhead_benchmark
}

#[cfg(feature = "monitor-wall-clock")]
criterion_main!(benches, monitor_benches);

#[cfg(not(feature = "monitor-wall-clock"))]
criterion_main!(benches);
