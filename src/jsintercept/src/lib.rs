//! This crate redirects calls of instrumented JVM methods into JavaScript handlers.
//!
//! A weaver rewrites each instrumented method so its body calls
//! [`Dispatcher::dispatch`]. The dispatcher runs the method's handler in a
//! pooled QuickJS context according to the handler's [`Policy`], and falls
//! back to the original method body when the interception machinery fails.
#![deny(unused_mut)]
#![warn(dead_code, missing_docs)]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

mod error;
mod handler;
mod key;
mod marshal;
mod script;
mod types;

/// Interceptor module containing the registry, pool, dispatcher and coordinator
pub mod interceptor;

/// The error type for jsintercept operations
pub use error::Error;
/// The Result of a jsintercept operation
pub type Result<T> = std::result::Result<T, Error>;

/// Handlers and interception policies
pub use handler::{HandlerId, Policy, ScriptHandler};
/// Interception keys and the descriptors they are built from
pub use key::{InterceptionKey, MethodSelector, TypeDescriptor};
/// Conversion between host and script values
pub use marshal::{Marshaller, PrecisionPolicy};
/// Types for working with handler scripts.
pub use script::Script;
/// Host-side values and types
pub use types::{
    HostArray, HostObject, HostThrowable, HostType, HostValue, MethodDescriptor, OBJECT_CLASS,
    SCRIPT_EXCEPTION_CLASS, STRING_CLASS,
};

/// A builder for creating a new `Interceptor`
pub use interceptor::builder::InterceptorBuilder;
/// Interceptor settings
pub use interceptor::config::InterceptorConfig;
/// Instrumentation
pub use interceptor::coordinator::{Coordinator, InstrumentOptions, Instrumented, Weaver};
/// Dispatching intercepted calls
pub use interceptor::dispatch::{DispatchPhase, Dispatcher, Fault, OriginalMethod};
/// Engine context pooling
pub use interceptor::pool::{
    Affinity, AssignmentPolicy, ContextId, ContextPool, ContextState, PoolConfig, PooledContext,
};
/// The handler registry
pub use interceptor::registry::HandlerRegistry;
/// The interceptor itself
pub use interceptor::Interceptor;

/// The monitor module, re-exports `sleep` so custom monitors don't couple to tokio directly.
pub use interceptor::monitor;
/// Trait for implementing execution monitors that can interrupt handlers.
pub use interceptor::monitor::ExecutionMonitor;
/// Sealed trait for monitor composition, derived for every `ExecutionMonitor`
/// and for tuples of up to 5 monitors.
pub use interceptor::monitor::MonitorSet;
/// Wall-clock based execution monitor.
#[cfg(feature = "monitor-wall-clock")]
pub use interceptor::monitor::WallClockMonitor;

/// The QuickJS script engine
pub use jsintercept_runtime::QuickJsEngine;
/// Engine seam and values shared with script engines
pub use jsintercept_common::{
    EngineError, FunctionHandle, HostCallback, InterruptHandle, MarshalledValue, ObjectRef,
    PASS_THROUGH_GLOBAL, SKIP_ORIGINAL_GLOBAL, ScriptContext, ScriptEngine, Sentinel, ThrownError,
};
