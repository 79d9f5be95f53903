//! The interceptor: registry, context pool, dispatcher and coordinator wired together.

use std::fmt;
use std::sync::Arc;

use jsintercept_common::ScriptEngine;
use jsintercept_runtime::QuickJsEngine;
use tracing::{Level, instrument};

use crate::handler::Policy;
use crate::key::{InterceptionKey, MethodSelector, TypeDescriptor};
use crate::marshal::Marshaller;
use crate::types::HostValue;
use crate::{Result, Script};

/// The builder for an [`Interceptor`].
pub mod builder;
/// JSON-loadable interceptor settings.
pub mod config;
/// Instrumentation and the weaver seam.
pub mod coordinator;
/// The dispatcher woven stubs call into.
pub mod dispatch;
pub(crate) mod metrics;
/// Execution monitors for handler invocations.
pub mod monitor;
/// The engine context pool.
pub mod pool;
/// The handler registry.
pub mod registry;

use coordinator::{Coordinator, InstrumentOptions, Instrumented, Weaver};
use dispatch::{Dispatcher, Fault, OriginalMethod};
use monitor::MonitorSet;
use pool::{ContextId, ContextPool, ContextState};
use registry::HandlerRegistry;

/// Redirects calls of instrumented methods into script handlers.
///
/// Create one with [`InterceptorBuilder`](builder::InterceptorBuilder).
/// Woven stubs hold on to the [`Dispatcher`] returned by
/// [`dispatcher`](Self::dispatcher); it stays usable for as long as they
/// keep it.
pub struct Interceptor<E: ScriptEngine = QuickJsEngine> {
    pool: Arc<ContextPool<E>>,
    dispatcher: Arc<Dispatcher<E>>,
    coordinator: Coordinator<E>,
}

impl<E: ScriptEngine> Interceptor<E> {
    pub(crate) fn new(engine: E, config: &config::InterceptorConfig, weaver: Box<dyn Weaver>) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let pool = Arc::new(ContextPool::new(engine, config.pool_config()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            pool.clone(),
            Marshaller::new(config.precision_policy),
        ));
        let coordinator = Coordinator::new(registry, pool.clone(), weaver);
        Self {
            pool,
            dispatcher,
            coordinator,
        }
    }

    /// Instruments `method` of `class` with a handler compiled from `script`.
    ///
    /// See [`Coordinator::instrument_with`] for the steps and errors.
    pub fn instrument(
        &self,
        class: &TypeDescriptor,
        method: &MethodSelector,
        script: impl Into<Script>,
        policy: Policy,
    ) -> Result<Instrumented> {
        self.coordinator.instrument(class, method, script.into(), policy)
    }

    /// Instruments `method` of `class`, optionally superseding an existing handler.
    pub fn instrument_with(
        &self,
        class: &TypeDescriptor,
        method: &MethodSelector,
        script: impl Into<Script>,
        policy: Policy,
        options: InstrumentOptions,
    ) -> Result<Instrumented> {
        self.coordinator
            .instrument_with(class, method, script.into(), policy, options)
    }

    /// Removes the handler of one method. Calls go straight to the original afterwards.
    pub fn revoke(&self, owner: &str, method: &MethodSelector) -> Result<bool> {
        self.coordinator.revoke(owner, method)
    }

    /// Removes every handler of a class, as when the class is unloaded.
    pub fn revoke_type(&self, owner: &str) -> usize {
        self.coordinator.revoke_type(owner)
    }

    /// Dispatches one call of an intercepted method. See [`Dispatcher::dispatch`].
    pub fn dispatch(
        &self,
        key: &InterceptionKey,
        receiver: Option<&HostValue>,
        args: &[HostValue],
        original: Option<&OriginalMethod>,
    ) -> Result<HostValue> {
        self.dispatcher.dispatch(key, receiver, args, original)
    }

    /// Dispatches one call under an execution monitor. See [`Dispatcher::dispatch_with_monitor`].
    pub fn dispatch_with_monitor<M: MonitorSet>(
        &self,
        key: &InterceptionKey,
        receiver: Option<&HostValue>,
        args: &[HostValue],
        original: Option<&OriginalMethod>,
        monitor: &M,
    ) -> Result<HostValue> {
        self.dispatcher
            .dispatch_with_monitor(key, receiver, args, original, monitor)
    }

    /// The dispatcher, for woven stubs to keep.
    pub fn dispatcher(&self) -> Arc<Dispatcher<E>> {
        self.dispatcher.clone()
    }

    /// The handler registry.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.coordinator.registry()
    }

    /// The engine context pool.
    pub fn pool(&self) -> &Arc<ContextPool<E>> {
        &self.pool
    }

    /// The most recent infrastructure faults, oldest first.
    pub fn recent_faults(&self) -> Vec<Fault> {
        self.dispatcher.recent_faults()
    }

    /// Disposes an engine context and every handler function compiled in it.
    ///
    /// Handlers bound to it stay registered; their dispatches fall back to
    /// the original method until they are instrumented again.
    pub fn dispose_context(&self, id: ContextId) -> bool {
        self.pool.dispose(id)
    }

    /// The lifecycle state of an engine context.
    pub fn context_state(&self, id: ContextId) -> ContextState {
        self.pool.state(id)
    }

    /// Disposes every context. Later dispatches of instrumented methods fall
    /// back to their originals; later instrumentations fail.
    #[instrument(skip(self), level = Level::INFO)]
    pub fn shutdown(&self) {
        self.pool.teardown();
    }
}

impl<E: ScriptEngine> fmt::Debug for Interceptor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
