use std::path::PathBuf;
use std::time::Duration;

use jsintercept_common::{EngineError, ThrownError};

use crate::interceptor::pool::ContextId;
use crate::key::InterceptionKey;
use crate::types::{HostThrowable, SCRIPT_EXCEPTION_CLASS};

/// Errors produced by jsintercept.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A handler is already registered for the key and replacement was not requested.
    #[error("a handler is already registered for {0}")]
    DuplicateRegistration(InterceptionKey),

    /// The handler script failed to compile.
    #[error("failed to compile handler for {key}: {message}")]
    Compilation {
        /// The key being instrumented.
        key: InterceptionKey,
        /// The engine's compiler message.
        message: String,
    },

    /// The weaver failed to rewrite the method.
    #[error("failed to weave {key}: {message}")]
    Weaving {
        /// The key being instrumented.
        key: InterceptionKey,
        /// The weaver's error chain.
        message: String,
    },

    /// A value could not be converted without loss.
    #[error("type coercion failed: {0}")]
    TypeCoercion(String),

    /// No engine context became available in time.
    #[error("no engine context became available within {0:?}")]
    PoolExhausted(Duration),

    /// The context the handler is bound to has been disposed.
    #[error("engine context {0} has been disposed")]
    DisposedContext(ContextId),

    /// The calling thread already holds the context it tried to acquire.
    #[error("engine context {0} is already held by the calling thread")]
    ReentrantContext(ContextId),

    /// The context pool has been torn down.
    #[error("the engine context pool has been closed")]
    PoolClosed,

    /// An execution monitor interrupted the handler.
    #[error("handler execution was interrupted")]
    Interrupted,

    /// The handler script threw.
    #[error("script threw {0}")]
    ScriptThrown(ThrownError),

    /// The original method threw.
    #[error("original method threw {0}")]
    HostThrown(HostThrowable),

    /// The policy needs the original method but the stub supplied none.
    #[error("no original method is available for {0}")]
    NoOriginal(InterceptionKey),

    /// A class name, method name or descriptor is malformed.
    #[error("invalid descriptor {descriptor:?}: {reason}")]
    InvalidDescriptor {
        /// The offending input.
        descriptor: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Any other script engine failure.
    #[error("script engine error: {0}")]
    Engine(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A script file could not be read.
    #[error("failed to read script from '{}'", .path.display())]
    ScriptRead {
        /// The script path.
        path: PathBuf,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Returns `true` for failures of the interception machinery itself.
    ///
    /// The dispatcher falls back to the original method on these, while script
    /// exceptions, coercion failures and original-method exceptions propagate.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Error::PoolExhausted(_)
                | Error::DisposedContext(_)
                | Error::ReentrantContext(_)
                | Error::PoolClosed
                | Error::Interrupted
                | Error::Engine(_)
        )
    }

    /// A short, stable name for the variant, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::DuplicateRegistration(_) => "duplicate_registration",
            Error::Compilation { .. } => "compilation",
            Error::Weaving { .. } => "weaving",
            Error::TypeCoercion(_) => "type_coercion",
            Error::PoolExhausted(_) => "pool_exhausted",
            Error::DisposedContext(_) => "disposed_context",
            Error::ReentrantContext(_) => "reentrant_context",
            Error::PoolClosed => "pool_closed",
            Error::Interrupted => "interrupted",
            Error::ScriptThrown(_) => "script_thrown",
            Error::HostThrown(_) => "host_thrown",
            Error::NoOriginal(_) => "no_original",
            Error::InvalidDescriptor { .. } => "invalid_descriptor",
            Error::Engine(_) => "engine",
            Error::Config(_) => "config",
            Error::ScriptRead { .. } => "script_read",
        }
    }

    /// The exception an instrumented method throws for this error.
    ///
    /// Original-method exceptions are returned unchanged. Script exceptions
    /// become the unchecked [`SCRIPT_EXCEPTION_CLASS`] carrying the script's
    /// message and stack.
    pub fn into_throwable(self) -> HostThrowable {
        match self {
            Error::HostThrown(throwable) => throwable,
            Error::ScriptThrown(thrown) => {
                HostThrowable::new(SCRIPT_EXCEPTION_CLASS, thrown.to_string())
                    .with_stack(thrown.stack)
            }
            Error::TypeCoercion(_) => {
                HostThrowable::new("java/lang/ClassCastException", self.to_string())
            }
            other => HostThrowable::new("java/lang/IllegalStateException", other.to_string()),
        }
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Thrown(thrown) => Error::ScriptThrown(thrown),
            EngineError::Conversion(message) => Error::TypeCoercion(message),
            EngineError::Interrupted => Error::Interrupted,
            other => Error::Engine(other.to_string()),
        }
    }
}
