//! The interception dispatcher.
//!
//! Every woven stub funnels into [`Dispatcher::dispatch`]. The dispatcher
//! resolves the handler for the key, marshals the call into the handler's
//! engine context, applies the handler's [`Policy`] and marshals the result
//! back. Failures of the machinery itself fall back to the original method;
//! script exceptions, coercion failures and original-method exceptions reach
//! the caller.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

use jsintercept_common::{
    EngineError, HostCallback, InterruptHandle, MarshalledValue, ScriptContext, ScriptEngine,
    Sentinel, ThrownError,
};
use tokio::task::JoinHandle;
use tracing::{Level, instrument};

use crate::handler::{Policy, ScriptHandler};
#[cfg(feature = "function_call_metrics")]
use crate::interceptor::metrics::HandlerCallMetricGuard;
use crate::interceptor::metrics::{record_dispatch, record_fallback};
use crate::interceptor::monitor::MonitorSet;
use crate::interceptor::monitor::runtime::get_monitor_runtime;
use crate::interceptor::pool::{Affinity, ContextPool};
use crate::interceptor::registry::HandlerRegistry;
use crate::key::InterceptionKey;
use crate::marshal::Marshaller;
use crate::types::{HostThrowable, HostValue};
use crate::{Error, Result};

/// The original method body, as handed to the dispatcher by a woven stub.
///
/// Returns the method's result or the exception it threw.
pub type OriginalMethod =
    Arc<dyn Fn(&[HostValue]) -> std::result::Result<HostValue, HostThrowable> + Send + Sync>;

const FAULT_LOG_CAPACITY: usize = 64;

/// Where a dispatch was when it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    /// Looking up the handler.
    Resolving,
    /// Converting the receiver and arguments.
    Marshalling,
    /// Leasing the context and running the handler or the original.
    Invoking,
    /// Converting the handler's result.
    Unmarshalling,
    /// Finished with a result.
    Done,
    /// Finished with an error.
    Failed,
}

/// A recorded infrastructure fault.
#[derive(Debug, Clone)]
pub struct Fault {
    /// The intercepted method.
    pub key: InterceptionKey,
    /// The phase the dispatch failed in.
    pub phase: DispatchPhase,
    /// The error kind, as [`Error::kind`].
    pub kind: &'static str,
    /// The error message.
    pub message: String,
    /// Whether the dispatch fell back to the original method.
    pub fell_back: bool,
}

#[derive(Default)]
struct FaultLog(Mutex<VecDeque<Fault>>);

impl FaultLog {
    fn push(&self, fault: Fault) {
        let mut faults = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if faults.len() == FAULT_LOG_CAPACITY {
            faults.pop_front();
        }
        faults.push_back(fault);
    }

    fn snapshot(&self) -> Vec<Fault> {
        let faults = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        faults.iter().cloned().collect()
    }
}

/// Aborts the spawned monitor task when dropped.
struct MonitorTask(JoinHandle<()>);

impl Drop for MonitorTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// The original method plus what it did during this dispatch, so a fallback
// never runs it a second time.
#[derive(Clone)]
struct TrackedOriginal {
    method: OriginalMethod,
    last: Rc<RefCell<Option<std::result::Result<HostValue, HostThrowable>>>>,
}

impl TrackedOriginal {
    fn new(method: &OriginalMethod) -> Self {
        Self {
            method: method.clone(),
            last: Rc::default(),
        }
    }

    fn call(&self, args: &[HostValue]) -> std::result::Result<HostValue, HostThrowable> {
        // the original may dispatch again (nested interception); no borrow is
        // held while it runs
        let result = (self.method)(args);
        *self.last.borrow_mut() = Some(result.clone());
        result
    }

    fn last(&self) -> Option<std::result::Result<HostValue, HostThrowable>> {
        self.last.borrow().clone()
    }
}

struct Attempt<'k> {
    key: &'k InterceptionKey,
    phase: DispatchPhase,
}

impl Attempt<'_> {
    fn advance(&mut self, phase: DispatchPhase) {
        tracing::trace!(key = %self.key, from = ?self.phase, to = ?phase, "dispatch phase");
        self.phase = phase;
    }

    // Returns the phase the dispatch failed in.
    fn fail(&mut self) -> DispatchPhase {
        let failed_in = self.phase;
        self.advance(DispatchPhase::Failed);
        failed_in
    }
}

/// Routes intercepted calls to their script handlers.
pub struct Dispatcher<E: ScriptEngine> {
    registry: Arc<HandlerRegistry>,
    pool: Arc<ContextPool<E>>,
    marshaller: Marshaller,
    faults: FaultLog,
}

impl<E: ScriptEngine> Dispatcher<E> {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        pool: Arc<ContextPool<E>>,
        marshaller: Marshaller,
    ) -> Self {
        Self {
            registry,
            pool,
            marshaller,
            faults: FaultLog::default(),
        }
    }

    /// Dispatches one call of an intercepted method.
    ///
    /// `receiver` is the instance the method was called on (`None` or
    /// [`HostValue::Null`] for static methods) and `original` the original
    /// method body, if the stub kept one. Without a registered handler the
    /// original is called directly.
    ///
    /// # Errors
    ///
    /// - [`Error::ScriptThrown`] if the handler throws.
    /// - [`Error::HostThrown`] if the original method throws.
    /// - [`Error::TypeCoercion`] if a value does not fit its declared type.
    /// - [`Error::NoOriginal`] if the policy needs an original and there is none.
    /// - Infrastructure errors ([`Error::is_infrastructure`]) only when there
    ///   is no original to fall back to.
    #[instrument(err(Debug), skip(self, receiver, args, original), level = Level::DEBUG)]
    pub fn dispatch(
        &self,
        key: &InterceptionKey,
        receiver: Option<&HostValue>,
        args: &[HostValue],
        original: Option<&OriginalMethod>,
    ) -> Result<HostValue> {
        self.run(key, receiver, args, original, None)
    }

    /// Like [`dispatch`](Self::dispatch), with the handler running under an
    /// execution monitor (or a tuple of monitors).
    ///
    /// If a monitor fires the handler is interrupted, its context discarded
    /// and the call falls back to the original. If a monitor fails to start
    /// the handler is not run at all.
    #[instrument(err(Debug), skip(self, receiver, args, original, monitor), level = Level::DEBUG)]
    pub fn dispatch_with_monitor<M: MonitorSet>(
        &self,
        key: &InterceptionKey,
        receiver: Option<&HostValue>,
        args: &[HostValue],
        original: Option<&OriginalMethod>,
        monitor: &M,
    ) -> Result<HostValue> {
        self.run(key, receiver, args, original, Some(monitor))
    }

    /// The most recent infrastructure faults, oldest first.
    pub fn recent_faults(&self) -> Vec<Fault> {
        self.faults.snapshot()
    }

    /// The registry handlers are resolved from.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// The pool handler contexts are leased from.
    pub fn pool(&self) -> &Arc<ContextPool<E>> {
        &self.pool
    }

    fn run(
        &self,
        key: &InterceptionKey,
        receiver: Option<&HostValue>,
        args: &[HostValue],
        original: Option<&OriginalMethod>,
        monitor: Option<&dyn MonitorSet>,
    ) -> Result<HostValue> {
        let mut attempt = Attempt {
            key,
            phase: DispatchPhase::Resolving,
        };

        let Some(handler) = self.registry.lookup(key) else {
            let Some(original) = original else {
                attempt.fail();
                record_dispatch("failed");
                return Err(Error::NoOriginal(key.clone()));
            };
            attempt.advance(DispatchPhase::Invoking);
            record_dispatch("pass_through");
            let result = original(args).map_err(Error::HostThrown);
            attempt.advance(DispatchPhase::Done);
            return result;
        };

        #[cfg(feature = "function_call_metrics")]
        let _call_metric = HandlerCallMetricGuard::new(key.to_string(), handler.policy().as_str());

        let original = original.map(TrackedOriginal::new);
        let result = self.apply(&handler, &mut attempt, receiver, args, original.as_ref(), monitor);

        match result {
            Ok(value) => {
                attempt.advance(DispatchPhase::Done);
                record_dispatch("scripted");
                Ok(value)
            }
            Err(err) if err.is_infrastructure() => {
                let phase = attempt.fail();
                self.fall_back(key, phase, err, args, original.as_ref())
            }
            Err(err) => {
                let phase = attempt.fail();
                tracing::debug!(%key, ?phase, "handler dispatch failed: {err}");
                record_dispatch("failed");
                Err(err)
            }
        }
    }

    fn apply(
        &self,
        handler: &ScriptHandler,
        attempt: &mut Attempt<'_>,
        receiver: Option<&HostValue>,
        args: &[HostValue],
        original: Option<&TrackedOriginal>,
        monitor: Option<&dyn MonitorSet>,
    ) -> Result<HostValue> {
        let key = attempt.key;
        attempt.advance(DispatchPhase::Marshalling);
        if args.len() != key.params().len() {
            return Err(Error::TypeCoercion(format!(
                "{key} takes {} arguments but was called with {}",
                key.params().len(),
                args.len()
            )));
        }
        let this = match receiver {
            Some(receiver) if !key.is_static() => self.marshaller.to_script(receiver)?,
            _ => MarshalledValue::Null,
        };
        let mut script_args = args
            .iter()
            .map(|arg| self.marshaller.to_script(arg))
            .collect::<Result<Vec<_>>>()?;

        match handler.policy() {
            Policy::Replace => {
                let result = self.invoke(handler, attempt, this, script_args, None, monitor)?;
                attempt.advance(DispatchPhase::Unmarshalling);
                self.marshaller.from_script(result, handler.return_type())
            }
            Policy::Before => {
                let result = self.invoke(handler, attempt, this, script_args, None, monitor)?;
                if result.is_sentinel(Sentinel::SkipOriginal) {
                    return Ok(handler.return_type().zero_value());
                }
                let original = original.ok_or_else(|| Error::NoOriginal(key.clone()))?;
                original.call(args).map_err(Error::HostThrown)
            }
            Policy::After => {
                let original = original.ok_or_else(|| Error::NoOriginal(key.clone()))?;
                attempt.advance(DispatchPhase::Invoking);
                let original_result = original.call(args).map_err(Error::HostThrown)?;

                attempt.advance(DispatchPhase::Marshalling);
                script_args.push(self.marshaller.to_script(&original_result)?);
                let result = self.invoke(handler, attempt, this, script_args, None, monitor)?;
                if result.is_sentinel(Sentinel::PassThrough) {
                    return Ok(original_result);
                }
                attempt.advance(DispatchPhase::Unmarshalling);
                self.marshaller.from_script(result, handler.return_type())
            }
            Policy::Around => {
                let escaped = Rc::new(RefCell::new(None));
                let proxy = self.around_proxy(key, args, original.cloned(), escaped.clone());
                let result = self.invoke(handler, attempt, this, script_args, Some(proxy), monitor);

                let result = match result {
                    Err(Error::ScriptThrown(thrown)) => {
                        return Err(rethrown_original(thrown, escaped.borrow_mut().take()));
                    }
                    other => other?,
                };
                attempt.advance(DispatchPhase::Unmarshalling);
                self.marshaller.from_script(result, handler.return_type())
            }
        }
    }

    fn invoke(
        &self,
        handler: &ScriptHandler,
        attempt: &mut Attempt<'_>,
        this: MarshalledValue,
        args: Vec<MarshalledValue>,
        proxy: Option<HostCallback>,
        monitor: Option<&dyn MonitorSet>,
    ) -> Result<MarshalledValue> {
        attempt.advance(DispatchPhase::Invoking);
        let mut lease = self.pool.acquire(Affinity::Bound(handler.context()))?;

        let interrupt = lease.interrupt_handle();
        let epoch = interrupt.reset();
        let _monitor_task = monitor
            .map(|monitor| arm_monitor(monitor, interrupt, epoch))
            .transpose()?;

        match lease.invoke(handler.function(), this, args, proxy) {
            Ok(value) => Ok(value),
            Err(err @ (EngineError::Interrupted | EngineError::Internal(_))) => {
                // engine state is undefined after a forced stop
                lease.discard();
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn around_proxy(
        &self,
        key: &InterceptionKey,
        args: &[HostValue],
        original: Option<TrackedOriginal>,
        escaped: Rc<RefCell<Option<HostThrowable>>>,
    ) -> HostCallback {
        let marshaller = self.marshaller;
        let key = key.clone();
        let params = key.params_arc();
        let args = args.to_vec();

        Box::new(move |script_args: Vec<MarshalledValue>| {
            let Some(original) = &original else {
                let throwable = Error::NoOriginal(key.clone()).into_throwable();
                return Err(marshaller.throwable_to_script(&throwable));
            };

            let call_args = if script_args.is_empty() {
                args.clone()
            } else if script_args.len() != params.len() {
                return Err(ThrownError::new(
                    "TypeError",
                    format!(
                        "{key} takes {} arguments but the original was called with {}",
                        params.len(),
                        script_args.len()
                    ),
                ));
            } else {
                script_args
                    .into_iter()
                    .zip(params.iter())
                    .map(|(value, ty)| marshaller.from_script(value, ty))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| ThrownError::new("TypeError", e.to_string()))?
            };

            match original.call(&call_args) {
                Ok(value) => marshaller
                    .to_script(&value)
                    .map_err(|e| ThrownError::new("TypeError", e.to_string())),
                Err(throwable) => {
                    let thrown = marshaller.throwable_to_script(&throwable);
                    *escaped.borrow_mut() = Some(throwable);
                    Err(thrown)
                }
            }
        })
    }

    fn fall_back(
        &self,
        key: &InterceptionKey,
        phase: DispatchPhase,
        err: Error,
        args: &[HostValue],
        original: Option<&TrackedOriginal>,
    ) -> Result<HostValue> {
        self.faults.push(Fault {
            key: key.clone(),
            phase,
            kind: err.kind(),
            message: err.to_string(),
            fell_back: original.is_some(),
        });

        let Some(original) = original else {
            tracing::warn!(%key, ?phase, "handler failed and there is no original to fall back to: {err}");
            record_dispatch("failed");
            return Err(err);
        };

        tracing::warn!(%key, ?phase, "handler failed, falling back to the original method: {err}");
        record_fallback(err.kind());
        record_dispatch("fallback");
        let result = match original.last() {
            Some(result) => result,
            None => original.call(args),
        };
        result.map_err(Error::HostThrown)
    }
}

impl<E: ScriptEngine> fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.registry.len())
            .field("pool", &self.pool)
            .field("marshaller", &self.marshaller)
            .finish_non_exhaustive()
    }
}

// An original-method exception the script let escape is rethrown unchanged.
fn rethrown_original(thrown: ThrownError, escaped: Option<HostThrowable>) -> Error {
    match escaped {
        Some(original) if original.class == thrown.name && original.message == thrown.message => {
            Error::HostThrown(original)
        }
        _ => Error::ScriptThrown(thrown),
    }
}

fn arm_monitor(
    monitor: &dyn MonitorSet,
    interrupt: InterruptHandle,
    epoch: u64,
) -> Result<MonitorTask> {
    let race = monitor.to_race().map_err(|e| {
        tracing::error!("failed to initialize execution monitor: {e:#}");
        Error::Engine(format!("Execution monitor failed to start: {e:#}"))
    })?;
    let runtime = get_monitor_runtime()
        .ok_or_else(|| Error::Engine("execution monitor runtime is unavailable".to_string()))?;

    // a task that fires after this dispatch returned may still run past the
    // abort; the epoch keeps it from killing the next invocation on this context
    Ok(MonitorTask(runtime.spawn(async move {
        race.await;
        if !interrupt.kill_epoch(epoch) {
            tracing::debug!("execution monitor fired after its dispatch finished");
        }
    })))
}
