use std::time::Duration;

use jsintercept_common::ScriptEngine;
use jsintercept_runtime::QuickJsEngine;

use super::Interceptor;
use super::config::InterceptorConfig;
use crate::Result;
use crate::interceptor::coordinator::Weaver;
use crate::interceptor::pool::AssignmentPolicy;
use crate::marshal::PrecisionPolicy;

/// A builder for an [`Interceptor`]
pub struct InterceptorBuilder<E: ScriptEngine = QuickJsEngine> {
    engine: E,
    config: InterceptorConfig,
}

impl InterceptorBuilder {
    /// Create a new InterceptorBuilder using the QuickJS engine with default settings
    pub fn new() -> Self {
        Self {
            engine: QuickJsEngine::new(),
            config: InterceptorConfig::default(),
        }
    }
}

impl Default for InterceptorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ScriptEngine> InterceptorBuilder<E> {
    /// Use a different script engine, e.g. a QuickJS engine with a memory limit
    pub fn with_engine<E2: ScriptEngine>(self, engine: E2) -> InterceptorBuilder<E2> {
        InterceptorBuilder {
            engine,
            config: self.config,
        }
    }

    /// Set the most engine contexts alive at once
    /// Dispatches beyond this wait for a context to be returned
    pub fn with_max_contexts(mut self, max_contexts: usize) -> Self {
        self.config.max_contexts = max_contexts;
        self
    }

    /// Set how long a dispatch waits for a context before falling back
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set how contexts are assigned to threads
    pub fn with_assignment_policy(mut self, policy: AssignmentPolicy) -> Self {
        self.config.assignment_policy = policy;
        self
    }

    /// Set what happens to longs a script cannot represent exactly
    pub fn with_precision_policy(mut self, policy: PrecisionPolicy) -> Self {
        self.config.precision_policy = policy;
        self
    }

    /// Replace all settings, e.g. with a configuration loaded by [`InterceptorConfig::from_json`]
    pub fn with_config(mut self, config: InterceptorConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Build the Interceptor
    ///
    /// No engine context is created until the first instrumentation.
    pub fn build(self, weaver: impl Weaver + 'static) -> Result<Interceptor<E>> {
        self.config.validate()?;
        Ok(Interceptor::new(self.engine, &self.config, Box::new(weaver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::key::{InterceptionKey, MethodSelector, TypeDescriptor};

    fn weaver(_: &TypeDescriptor, _: &MethodSelector, _: &InterceptionKey) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    #[test]
    fn settings_accumulate() {
        let builder = InterceptorBuilder::new()
            .with_max_contexts(2)
            .with_acquire_timeout(Duration::from_millis(300))
            .with_assignment_policy(AssignmentPolicy::RoundRobin)
            .with_precision_policy(PrecisionPolicy::Reject);
        let config = builder.get_config();
        assert_eq!(config.max_contexts, 2);
        assert_eq!(config.acquire_timeout_ms, 300);
        assert_eq!(config.assignment_policy, AssignmentPolicy::RoundRobin);
        assert_eq!(config.precision_policy, PrecisionPolicy::Reject);

        let interceptor = builder.build(weaver).unwrap();
        assert_eq!(interceptor.pool().config().max_contexts, 2);
        assert!(interceptor.pool().is_empty());
    }

    #[test]
    fn zero_contexts_is_a_configuration_error() {
        let err = InterceptorBuilder::new()
            .with_max_contexts(0)
            .build(weaver)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn engines_can_be_swapped() {
        let interceptor = InterceptorBuilder::new()
            .with_engine(QuickJsEngine::new().with_memory_limit(16 * 1024 * 1024))
            .with_max_contexts(1)
            .build(weaver)
            .unwrap();
        assert_eq!(interceptor.pool().engine().name(), "quickjs");
    }
}
