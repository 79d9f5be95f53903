#![allow(clippy::disallowed_macros)]
//! Instruments a pretend `com.example.Calculator` and calls it the way woven
//! bytecode would.
//!
//! Run with `cargo run --example calculator`; set `RUST_LOG` to see the
//! interceptor's own spans, e.g. `RUST_LOG=info,jsintercept=trace`.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use jsintercept::{
    AssignmentPolicy, HostThrowable, HostValue, InterceptionKey, InterceptorBuilder,
    MethodSelector, OriginalMethod, Policy, Script, TypeDescriptor,
};
use tracing_subscriber::filter::EnvFilter;

const CALCULATOR: &str = "com/example/Calculator";

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::builder().parse("info,jsintercept=debug"))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let interceptor = InterceptorBuilder::new()
        .with_max_contexts(2)
        .with_acquire_timeout(Duration::from_millis(500))
        .with_assignment_policy(AssignmentPolicy::ThreadAffine)
        .build(rewrite)?;

    let class = TypeDescriptor::new(CALCULATOR, b"\xca\xfe\xba\xbe".to_vec());
    let add = MethodSelector::new("add", "(II)I");
    let divide = MethodSelector::new("divide", "(II)I");

    let added = interceptor.instrument(
        &class,
        &add,
        "(a, b, original) => original() + 1",
        Policy::Around,
    )?;
    println!("woven {} ({} bytes)", added.key, added.class_bytes.len());

    let audit = demo_dir().join("handlers").join("audit.js");
    let divided = interceptor.instrument(&class, &divide, Script::from_file(&audit)?, Policy::After)?;
    println!("woven {} from {}", divided.key, audit.display());

    let add_original: OriginalMethod = Arc::new(|args: &[HostValue]| match args {
        [HostValue::Int(a), HostValue::Int(b)] => Ok(HostValue::Int(a.wrapping_add(*b))),
        _ => Err(HostThrowable::new("java/lang/IllegalArgumentException", "bad operands")),
    });
    let divide_original: OriginalMethod = Arc::new(|args: &[HostValue]| match args {
        [_, HostValue::Int(0)] => Err(HostThrowable::new("java/lang/ArithmeticException", "/ by zero")),
        [HostValue::Int(a), HostValue::Int(b)] => Ok(HostValue::Int(a / b)),
        _ => Err(HostThrowable::new("java/lang/IllegalArgumentException", "bad operands")),
    });

    // each worker gets its own context for handlers it calls
    thread::scope(|s| {
        for worker in 0..2 {
            let interceptor = &interceptor;
            let key = &added.key;
            let original = &add_original;
            s.spawn(move || {
                for x in 0..3 {
                    let args = [HostValue::Int(worker * 10), HostValue::Int(x)];
                    match interceptor.dispatch(key, None, &args, Some(original)) {
                        Ok(result) => println!("worker {worker}: add({}, {x}) = {result:?}", worker * 10),
                        Err(err) => eprintln!("worker {worker}: {err}"),
                    }
                }
            });
        }
    });

    for (a, b) in [(10, 2), (i32::MAX, 1), (1, 0)] {
        let args = [HostValue::Int(a), HostValue::Int(b)];
        match interceptor.dispatch(&divided.key, None, &args, Some(&divide_original)) {
            Ok(result) => println!("divide({a}, {b}) = {result:?}"),
            Err(err) => println!("divide({a}, {b}) threw {}", err.into_throwable()),
        }
    }

    println!("revoked add: {}", interceptor.revoke(CALCULATOR, &add)?);
    let args = [HostValue::Int(2), HostValue::Int(3)];
    println!(
        "add(2, 3) after revoke = {:?}",
        interceptor.dispatch(&added.key, None, &args, Some(&add_original))?
    );

    interceptor.shutdown();
    Ok(())
}

// Stands in for a bytecode rewriter: a real one would splice a call to the
// dispatcher into the method body.
fn rewrite(
    class: &TypeDescriptor,
    method: &MethodSelector,
    key: &InterceptionKey,
) -> anyhow::Result<Vec<u8>> {
    anyhow::ensure!(!class.bytes().is_empty(), "no class bytes for {}", class.name());
    let mut woven = class.bytes().to_vec();
    woven.extend_from_slice(key.to_string().as_bytes());
    tracing::debug!(method = method.name(), "rewrote method body");
    Ok(woven)
}

fn demo_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join("calculator")
}
