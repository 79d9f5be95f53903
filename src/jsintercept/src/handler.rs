use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use jsintercept_common::FunctionHandle;
use serde::{Deserialize, Serialize};

use crate::interceptor::metrics::MetricsGuard;
use crate::interceptor::pool::ContextId;
use crate::types::HostType;
use crate::{Error, Script};

/// How a handler combines with the original method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// The handler runs instead of the original.
    Replace,
    /// The handler runs first and may skip the original by returning `SKIP_ORIGINAL`.
    Before,
    /// The handler runs after the original and receives its result as a final argument.
    After,
    /// The handler receives a proxy for the original as a final argument.
    Around,
}

impl Policy {
    /// The lowercase policy name.
    pub fn as_str(self) -> &'static str {
        match self {
            Policy::Replace => "replace",
            Policy::Before => "before",
            Policy::After => "after",
            Policy::Around => "around",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Policy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replace" => Ok(Policy::Replace),
            "before" => Ok(Policy::Before),
            "after" => Ok(Policy::After),
            "around" => Ok(Policy::Around),
            _ => Err(Error::Config(format!("unknown interception policy {s:?}"))),
        }
    }
}

/// Identifies one registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// A compiled handler bound to one engine context.
///
/// The function handle is only valid while that context is active; the pool
/// decides, the handler only remembers which context to ask for.
pub struct ScriptHandler {
    id: HandlerId,
    script: Script,
    policy: Policy,
    context: ContextId,
    function: FunctionHandle,
    return_type: HostType,
    _metric_guard: MetricsGuard<ScriptHandler>,
}

impl ScriptHandler {
    pub(crate) fn new(
        script: Script,
        policy: Policy,
        context: ContextId,
        function: FunctionHandle,
        return_type: HostType,
    ) -> Self {
        Self {
            id: HandlerId::next(),
            script,
            policy,
            context,
            function,
            return_type,
            _metric_guard: MetricsGuard::new(),
        }
    }

    /// The handler id.
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// The source the handler was compiled from.
    pub fn script(&self) -> &Script {
        &self.script
    }

    /// The interception policy.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// The context the handler is compiled in.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// The compiled function inside [`context`](Self::context).
    pub fn function(&self) -> FunctionHandle {
        self.function
    }

    /// The intercepted method's return type.
    pub fn return_type(&self) -> &HostType {
        &self.return_type
    }
}

impl fmt::Debug for ScriptHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandler")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("context", &self.context)
            .field("function", &self.function)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}
