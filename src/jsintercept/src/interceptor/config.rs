use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::interceptor::pool::{AssignmentPolicy, PoolConfig};
use crate::marshal::PrecisionPolicy;
use crate::{Error, Result};

/// Interceptor settings, loadable from JSON.
///
/// Missing fields take their defaults; unknown fields are rejected.
///
/// ```text
/// { "max_contexts": 8, "acquire_timeout_ms": 250, "assignment_policy": "round_robin" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterceptorConfig {
    /// The most engine contexts alive at once.
    pub max_contexts: usize,
    /// How long a dispatch waits for a context, in milliseconds.
    pub acquire_timeout_ms: u64,
    /// How contexts are assigned to threads.
    pub assignment_policy: AssignmentPolicy,
    /// What to do with longs a script cannot represent exactly.
    pub precision_policy: PrecisionPolicy,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            max_contexts: pool.max_contexts,
            acquire_timeout_ms: pool.acquire_timeout.as_millis() as u64,
            assignment_policy: pool.policy,
            precision_policy: PrecisionPolicy::default(),
        }
    }
}

impl InterceptorConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("malformed interceptor configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_contexts == 0 {
            return Err(Error::Config("max_contexts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub(crate) fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_contexts: self.max_contexts,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            policy: self.assignment_policy,
        }
    }
}
