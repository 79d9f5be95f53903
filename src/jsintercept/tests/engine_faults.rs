//! Engine failures that are not script exceptions.

#![allow(clippy::disallowed_macros)]

mod common;

use std::thread;

use common::{RecordingWeaver, add, calculator, interceptor, ints, real_add};
use jsintercept::{
    ContextState, EngineError, Error, FunctionHandle, HostCallback, HostValue,
    InterceptorBuilder, InterruptHandle, MarshalledValue, Policy, ScriptContext, ScriptEngine,
};

/// An engine whose contexts compile anything and then fail every call internally.
struct Corrupted;

struct CorruptedContext(InterruptHandle);

impl ScriptEngine for Corrupted {
    type Context = CorruptedContext;

    fn create_context(&self) -> Result<CorruptedContext, EngineError> {
        Ok(CorruptedContext(InterruptHandle::new()))
    }

    fn name(&self) -> &'static str {
        "corrupted"
    }
}

impl ScriptContext for CorruptedContext {
    fn compile(&mut self, _: &str, _: &str) -> Result<FunctionHandle, EngineError> {
        Ok(FunctionHandle(1))
    }

    fn invoke(
        &mut self,
        _: FunctionHandle,
        _: MarshalledValue,
        _: Vec<MarshalledValue>,
        _: Option<HostCallback>,
    ) -> Result<MarshalledValue, EngineError> {
        Err(EngineError::Internal("heap corrupted".into()))
    }

    fn release(&mut self, _: FunctionHandle) -> bool {
        true
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.0.clone()
    }
}

#[test]
fn internal_engine_errors_fall_back_to_the_original() {
    let interceptor = InterceptorBuilder::new()
        .with_engine(Corrupted)
        .build(RecordingWeaver::default())
        .unwrap();
    let instrumented = interceptor
        .instrument(&calculator(), &add(), "(a, b) => a * b", Policy::Replace)
        .unwrap();
    let original = real_add();

    let result = interceptor
        .dispatch(&instrumented.key, None, &ints(&[2, 3]), Some(&original.method))
        .unwrap();
    assert_eq!(result, HostValue::Int(5));
    assert_eq!(original.calls(), 1);

    let faults = interceptor.recent_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].kind, "engine");
    assert!(faults[0].fell_back);
    assert!(faults[0].message.contains("heap corrupted"), "{}", faults[0].message);
    assert_eq!(interceptor.context_state(instrumented.context), ContextState::Disposed);
}

#[test]
fn internal_engine_errors_without_an_original_are_not_script_exceptions() {
    let interceptor = InterceptorBuilder::new()
        .with_engine(Corrupted)
        .build(RecordingWeaver::default())
        .unwrap();
    let instrumented = interceptor
        .instrument(&calculator(), &add(), "(a, b) => a * b", Policy::Replace)
        .unwrap();

    let err = interceptor
        .dispatch(&instrumented.key, None, &ints(&[2, 3]), None)
        .unwrap_err();
    assert!(matches!(err, Error::Engine(ref message) if message.contains("heap corrupted")), "{err}");
}

#[test]
fn handlers_compiled_on_another_thread_run_without_faults() {
    let interceptor = interceptor();
    // the context is created on the instrumenting thread
    let instrumented = thread::scope(|s| {
        s.spawn(|| {
            interceptor
                .instrument(
                    &calculator(),
                    &add(),
                    "(a, b) => { const sum = (n) => n === 0 ? a : 1 + sum(n - 1); return sum(b) + 1; }",
                    Policy::Replace,
                )
                .unwrap()
        })
        .join()
        .unwrap()
    });
    let original = real_add();

    let result = interceptor.dispatch(&instrumented.key, None, &ints(&[2, 3]), Some(&original.method));
    assert_eq!(result.unwrap(), HostValue::Int(6));
    assert_eq!(original.calls(), 0);
    assert!(interceptor.recent_faults().is_empty());

    // and from yet another thread
    let result = thread::scope(|s| {
        s.spawn(|| interceptor.dispatch(&instrumented.key, None, &ints(&[40, 1]), Some(&original.method)))
            .join()
            .unwrap()
    });
    assert_eq!(result.unwrap(), HostValue::Int(42));
    assert_eq!(original.calls(), 0);
    assert!(interceptor.recent_faults().is_empty());
}
