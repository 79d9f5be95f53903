//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use jsintercept::{
    HostThrowable, HostValue, InterceptionKey, Interceptor, InterceptorBuilder, MethodSelector,
    OriginalMethod, TypeDescriptor, Weaver,
};

pub const CALCULATOR: &str = "com/example/Calculator";

/// Pretends to rewrite classes and remembers which keys it was asked to weave.
#[derive(Clone, Default)]
pub struct RecordingWeaver {
    woven: Arc<Mutex<Vec<InterceptionKey>>>,
    fail: bool,
}

impl RecordingWeaver {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn woven(&self) -> Vec<InterceptionKey> {
        self.woven.lock().unwrap().clone()
    }
}

impl Weaver for RecordingWeaver {
    fn weave(
        &self,
        class: &TypeDescriptor,
        method: &MethodSelector,
        key: &InterceptionKey,
    ) -> anyhow::Result<Vec<u8>> {
        if self.fail {
            return Err(anyhow::anyhow!("unsupported bytecode version"))
                .with_context(|| format!("rewriting {}", method.name()));
        }
        self.woven.lock().unwrap().push(key.clone());
        let mut bytes = b"woven:".to_vec();
        bytes.extend_from_slice(class.bytes());
        Ok(bytes)
    }
}

pub fn calculator() -> TypeDescriptor {
    TypeDescriptor::new(CALCULATOR, b"Calculator.class".to_vec())
}

pub fn add() -> MethodSelector {
    MethodSelector::new("add", "(II)I")
}

pub fn interceptor() -> Interceptor {
    InterceptorBuilder::new()
        .build(RecordingWeaver::default())
        .unwrap()
}

/// An original method that counts its calls.
pub struct Counted {
    pub method: OriginalMethod,
    calls: Arc<AtomicUsize>,
}

impl Counted {
    pub fn new(
        body: impl Fn(&[HostValue]) -> Result<HostValue, HostThrowable> + Send + Sync + 'static,
    ) -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        Self {
            method: Arc::new(move |args: &[HostValue]| {
                counter.fetch_add(1, Ordering::SeqCst);
                body(args)
            }),
            calls,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// `Calculator.add` as the host implements it.
pub fn real_add() -> Counted {
    Counted::new(|args| match args {
        [HostValue::Int(a), HostValue::Int(b)] => Ok(HostValue::Int(a + b)),
        _ => Err(HostThrowable::new(
            "java/lang/IllegalArgumentException",
            "add takes two ints",
        )),
    })
}

pub fn ints(values: &[i32]) -> Vec<HostValue> {
    values.iter().copied().map(HostValue::Int).collect()
}
