//! Types shared between the jsintercept host crate and script engine implementations.
#![deny(missing_docs, unused_mut)]

mod engine;
mod value;

pub use engine::{
    EngineError, FunctionHandle, HostCallback, InterruptHandle, ScriptContext, ScriptEngine,
};
pub use value::{MarshalledValue, ObjectRef, Sentinel, ThrownError};

/// Name of the script global holding the "skip original" sentinel returned by `Before` handlers.
pub const SKIP_ORIGINAL_GLOBAL: &str = "SKIP_ORIGINAL";

/// Name of the script global holding the "pass through" sentinel returned by `After` handlers.
pub const PASS_THROUGH_GLOBAL: &str = "PASS_THROUGH";

/// Registry key of the symbol backing [`SKIP_ORIGINAL_GLOBAL`].
pub const SKIP_ORIGINAL_SYMBOL: &str = "jsintercept.skipOriginal";

/// Registry key of the symbol backing [`PASS_THROUGH_GLOBAL`].
pub const PASS_THROUGH_SYMBOL: &str = "jsintercept.passThrough";

/// Hidden property carrying the handle id of a host object inside a script.
pub const HOST_HANDLE_PROPERTY: &str = "__hostHandle";

/// Read-only property exposing the internal class name of a host object to scripts.
pub const HOST_CLASS_PROPERTY: &str = "hostClass";

/// Largest integer a script number represents exactly (`Number.MAX_SAFE_INTEGER`).
pub const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;
