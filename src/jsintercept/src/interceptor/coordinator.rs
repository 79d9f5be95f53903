//! Instrumentation: compiling a handler, weaving the method and registering
//! the handler, with no partial registration on any failure.

use std::fmt;
use std::sync::Arc;

use jsintercept_common::{EngineError, ScriptContext, ScriptEngine};
use tracing::{Level, instrument};

use crate::handler::{HandlerId, Policy, ScriptHandler};
use crate::interceptor::pool::{Affinity, ContextId, ContextPool};
use crate::interceptor::registry::HandlerRegistry;
use crate::key::{InterceptionKey, MethodSelector, TypeDescriptor};
use crate::{Error, Result, Script};

/// Rewrites a method so its body calls the dispatcher.
///
/// The rewritten stub calls [`Dispatcher::dispatch`](crate::Dispatcher::dispatch)
/// with `key`, the receiver (or null), the arguments and the original body,
/// and returns or throws what it returns or throws
/// (see [`Error::into_throwable`]).
///
/// Closures with the matching signature are weavers too.
pub trait Weaver: Send + Sync {
    /// Returns the rewritten class bytes.
    fn weave(
        &self,
        class: &TypeDescriptor,
        method: &MethodSelector,
        key: &InterceptionKey,
    ) -> anyhow::Result<Vec<u8>>;
}

impl<F> Weaver for F
where
    F: Fn(&TypeDescriptor, &MethodSelector, &InterceptionKey) -> anyhow::Result<Vec<u8>>
        + Send
        + Sync,
{
    fn weave(
        &self,
        class: &TypeDescriptor,
        method: &MethodSelector,
        key: &InterceptionKey,
    ) -> anyhow::Result<Vec<u8>> {
        self(class, method, key)
    }
}

/// Options for [`Coordinator::instrument_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Supersede an existing handler instead of failing with
    /// [`Error::DuplicateRegistration`].
    pub replace: bool,
}

/// The result of a successful instrumentation.
#[derive(Debug, Clone)]
pub struct Instrumented {
    /// The key the handler is registered under.
    pub key: InterceptionKey,
    /// The new handler.
    pub handler: HandlerId,
    /// The context the handler was compiled in.
    pub context: ContextId,
    /// The class bytes returned by the weaver.
    pub class_bytes: Vec<u8>,
}

/// Compiles handlers, drives the weaver and maintains the registry.
pub struct Coordinator<E: ScriptEngine> {
    registry: Arc<HandlerRegistry>,
    pool: Arc<ContextPool<E>>,
    weaver: Box<dyn Weaver>,
}

impl<E: ScriptEngine> Coordinator<E> {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        pool: Arc<ContextPool<E>>,
        weaver: Box<dyn Weaver>,
    ) -> Self {
        Self {
            registry,
            pool,
            weaver,
        }
    }

    /// Instruments `method` of `class` with a handler compiled from `script`.
    ///
    /// Equivalent to [`instrument_with`](Self::instrument_with) with default options.
    pub fn instrument(
        &self,
        class: &TypeDescriptor,
        method: &MethodSelector,
        script: Script,
        policy: Policy,
    ) -> Result<Instrumented> {
        self.instrument_with(class, method, script, policy, InstrumentOptions::default())
    }

    /// Instruments `method` of `class` with a handler compiled from `script`.
    ///
    /// The handler is compiled in a context leased for the calling thread and
    /// stays bound to that context. It is registered only once the weaver has
    /// rewritten the method.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDescriptor`] for a malformed class name, method name or descriptor.
    /// - [`Error::DuplicateRegistration`] if the key is taken and `options.replace` is off.
    /// - [`Error::Compilation`] if the script does not compile to a function.
    /// - [`Error::Weaving`] if the weaver fails.
    /// - Pool errors if no context can be leased.
    #[instrument(err(Debug), skip(self, class, script), fields(class = class.name()), level = Level::INFO)]
    pub fn instrument_with(
        &self,
        class: &TypeDescriptor,
        method: &MethodSelector,
        script: Script,
        policy: Policy,
        options: InstrumentOptions,
    ) -> Result<Instrumented> {
        let key = InterceptionKey::new(class.name(), method)?;
        let descriptor = method.method_descriptor()?;
        if !options.replace && self.registry.contains(&key) {
            return Err(Error::DuplicateRegistration(key));
        }

        let mut lease = self.pool.acquire(Affinity::CurrentThread)?;
        let context = lease.id();
        let function = lease
            .compile(&script.module_name(&key.to_string()), script.content())
            .map_err(|err| match err {
                EngineError::Compilation(message) => Error::Compilation {
                    key: key.clone(),
                    message,
                },
                other => Error::from(other),
            })?;

        let class_bytes = match self.weaver.weave(class, method, &key) {
            Ok(bytes) => bytes,
            Err(err) => {
                lease.release(function);
                return Err(Error::Weaving {
                    key,
                    message: format!("{err:#}"),
                });
            }
        };

        let handler = Arc::new(ScriptHandler::new(
            script,
            policy,
            context,
            function,
            descriptor.return_type,
        ));
        let handler_id = handler.id();
        let superseded = match self.registry.register(key.clone(), handler, options.replace) {
            Ok(superseded) => superseded,
            Err(err) => {
                // lost a race with a concurrent registration
                lease.release(function);
                return Err(err);
            }
        };
        drop(lease);

        if let Some(previous) = superseded {
            self.release_handler(&previous);
        }
        tracing::info!(%key, handler = %handler_id, %context, %policy, "instrumented method");
        Ok(Instrumented {
            key,
            handler: handler_id,
            context,
            class_bytes,
        })
    }

    /// Removes the handler of one method. Returns `false` if none was registered.
    #[instrument(err(Debug), skip(self, method), level = Level::INFO)]
    pub fn revoke(&self, owner: &str, method: &MethodSelector) -> Result<bool> {
        let key = InterceptionKey::new(owner, method)?;
        match self.registry.unregister(&key) {
            Some(handler) => {
                self.release_handler(&handler);
                tracing::info!(%key, "revoked handler");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every handler of a class, as when the class is unloaded.
    /// Returns how many were removed.
    #[instrument(skip(self), level = Level::INFO)]
    pub fn revoke_type(&self, owner: &str) -> usize {
        let removed = self.registry.unregister_owner(owner);
        for (_, handler) in &removed {
            self.release_handler(handler);
        }
        removed.len()
    }

    /// The registry handlers are added to.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    // Best effort: a disposed context took the function with it.
    fn release_handler(&self, handler: &ScriptHandler) {
        match self.pool.acquire(Affinity::Bound(handler.context())) {
            Ok(mut lease) => {
                lease.release(handler.function());
            }
            Err(err) => tracing::debug!(
                handler = %handler.id(),
                context = %handler.context(),
                "not releasing handler function: {err}"
            ),
        }
    }
}

impl<E: ScriptEngine> fmt::Debug for Coordinator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("handlers", &self.registry.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
