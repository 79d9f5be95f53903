use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::value::{MarshalledValue, ThrownError};

/// Identifies a function compiled inside one script context.
///
/// A handle is only meaningful to the context that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionHandle(pub u64);

impl fmt::Display for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// A host callable handed to a script for the duration of one invocation.
///
/// The script calls it with marshalled arguments; an `Err` is thrown into the script.
pub type HostCallback = Box<dyn FnMut(Vec<MarshalledValue>) -> Result<MarshalledValue, ThrownError>>;

/// A flag a monitor sets to interrupt script execution in a context.
///
/// Engines poll it from their interrupt hook and abort the running script once set.
///
/// Every [`reset`](Self::reset) starts a new epoch. A monitor that captured the
/// epoch when it was armed kills through [`kill_epoch`](Self::kill_epoch), which
/// does nothing once a later invocation has reset the handle.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicU64>);

// The low bit is the kill flag, the remaining bits are the epoch.
const KILLED: u64 = 1;

impl InterruptHandle {
    /// Creates a handle in the not-killed state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests termination of whatever script is running.
    pub fn kill(&self) {
        self.0.fetch_or(KILLED, Ordering::SeqCst);
    }

    /// Requests termination only if no reset happened since `epoch` was handed out.
    ///
    /// Returns `true` if the kill flag was set.
    pub fn kill_epoch(&self, epoch: u64) -> bool {
        let armed = epoch << 1;
        match self
            .0
            .compare_exchange(armed, armed | KILLED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == armed | KILLED,
        }
    }

    /// Returns `true` once [`kill`](Self::kill) has been called since the last reset.
    pub fn is_killed(&self) -> bool {
        self.0.load(Ordering::SeqCst) & KILLED != 0
    }

    /// Clears a stale kill request before the next invocation and returns the new epoch.
    pub fn reset(&self) -> u64 {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
                Some(((state >> 1).wrapping_add(1)) << 1)
            })
            .unwrap_or_else(|state| state);
        (previous >> 1).wrapping_add(1) & (u64::MAX >> 1)
    }
}

/// Errors reported by a script engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The source failed to compile or did not produce a function.
    Compilation(String),
    /// The script threw.
    Thrown(ThrownError),
    /// A value could not be converted across the boundary.
    Conversion(String),
    /// Execution was interrupted through the context's [`InterruptHandle`].
    Interrupted,
    /// The function handle is not (or no longer) known to the context.
    UnknownFunction(FunctionHandle),
    /// Any other engine failure. The context state is undefined afterwards.
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Compilation(msg) => write!(f, "compilation failed: {msg}"),
            EngineError::Thrown(err) => write!(f, "script threw {err}"),
            EngineError::Conversion(msg) => write!(f, "value conversion failed: {msg}"),
            EngineError::Interrupted => f.write_str("script execution was interrupted"),
            EngineError::UnknownFunction(handle) => write!(f, "unknown function {handle}"),
            EngineError::Internal(msg) => write!(f, "internal engine error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// A script engine able to create isolated execution contexts.
pub trait ScriptEngine: Send + Sync + 'static {
    /// The context type this engine creates.
    type Context: ScriptContext;

    /// Creates a new, isolated context with the jsintercept globals installed.
    fn create_context(&self) -> Result<Self::Context, EngineError>;

    /// Human-readable engine name for logging.
    fn name(&self) -> &'static str;
}

/// An isolated script execution environment.
///
/// A context is driven by one thread at a time. Dropping it disposes it and
/// invalidates every function handle it produced.
pub trait ScriptContext: Send + 'static {
    /// Compiles `source` into a function. `name` is used in stack traces.
    fn compile(&mut self, name: &str, source: &str) -> Result<FunctionHandle, EngineError>;

    /// Calls a compiled function with `this` bound to `this` and the given arguments.
    ///
    /// When `proxy` is given it is appended as an extra, final, callable
    /// argument. It is only valid until this call returns.
    ///
    /// A kill request already pending on the [`InterruptHandle`] aborts the
    /// call, so callers reset the handle before arming a monitor.
    fn invoke(
        &mut self,
        function: FunctionHandle,
        this: MarshalledValue,
        args: Vec<MarshalledValue>,
        proxy: Option<HostCallback>,
    ) -> Result<MarshalledValue, EngineError>;

    /// Frees a compiled function. Returns `false` if it was unknown.
    fn release(&mut self, function: FunctionHandle) -> bool;

    /// A handle that interrupts script execution in this context.
    fn interrupt_handle(&self) -> InterruptHandle;
}
