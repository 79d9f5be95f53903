/*!
This module contains the definitions and implementations of the metrics used by the interceptor module
*/

use tracing::{Level, instrument};

use crate::handler::ScriptHandler;
use crate::interceptor::pool::EngineContext;

// Gauges, live engine contexts and registered handlers
static METRIC_ACTIVE_ENGINE_CONTEXTS: &str = "active_engine_contexts";
static METRIC_ACTIVE_SCRIPT_HANDLERS: &str = "active_script_handlers";

// Counters, totals created during lifetime of the process
static METRIC_TOTAL_ENGINE_CONTEXTS: &str = "engine_contexts_total";
static METRIC_TOTAL_SCRIPT_HANDLERS: &str = "script_handlers_total";

// Counters, total number of engine contexts disposed during the lifetime of the process
pub(crate) static METRIC_ENGINE_CONTEXT_DISPOSALS: &str = "engine_context_disposals_total";

// Counters, dispatch outcomes and fallbacks
pub(crate) static METRIC_DISPATCHES: &str = "dispatches_total";
pub(crate) static METRIC_DISPATCH_OUTCOME_LABEL: &str = "outcome";
pub(crate) static METRIC_DISPATCH_FALLBACKS: &str = "dispatch_fallbacks_total";
pub(crate) static METRIC_DISPATCH_FALLBACK_REASON_LABEL: &str = "reason";

// Counters, integral values that lost precision on their way into a script
pub(crate) static METRIC_MARSHAL_PRECISION_LOSS: &str = "marshal_precision_loss_total";

// Counters, execution monitor terminations
pub(crate) static METRIC_MONITOR_TERMINATIONS: &str = "monitor_terminations_total";
pub(crate) static METRIC_MONITOR_TYPE_LABEL: &str = "monitor_type";

// Histogram, handler call durations
#[cfg(feature = "function_call_metrics")]
static METRIC_HANDLER_CALL_DURATION: &str = "handler_call_duration_micros";
#[cfg(feature = "function_call_metrics")]
static METRIC_HANDLER_LABEL: &str = "handler";
#[cfg(feature = "function_call_metrics")]
static METRIC_POLICY_LABEL: &str = "policy";

pub(crate) trait MetricsTrait {
    const GAUGE: &'static str;
    const COUNTER: &'static str;
}

pub(crate) struct MetricsGuard<T: MetricsTrait>(std::marker::PhantomData<T>);

impl<T: MetricsTrait> MetricsGuard<T> {
    #[instrument(skip_all, level=Level::DEBUG)]
    pub(crate) fn new() -> Self {
        metrics::gauge!(T::GAUGE).increment(1);
        metrics::counter!(T::COUNTER).increment(1);
        Self(std::marker::PhantomData)
    }
}

impl<T: MetricsTrait> Drop for MetricsGuard<T> {
    #[instrument(skip_all, level=Level::DEBUG)]
    fn drop(&mut self) {
        metrics::gauge!(T::GAUGE).decrement(1);
    }
}

impl<C> MetricsTrait for EngineContext<C> {
    const GAUGE: &'static str = METRIC_ACTIVE_ENGINE_CONTEXTS;
    const COUNTER: &'static str = METRIC_TOTAL_ENGINE_CONTEXTS;
}

impl MetricsTrait for ScriptHandler {
    const GAUGE: &'static str = METRIC_ACTIVE_SCRIPT_HANDLERS;
    const COUNTER: &'static str = METRIC_TOTAL_SCRIPT_HANDLERS;
}

pub(crate) fn record_dispatch(outcome: &'static str) {
    metrics::counter!(METRIC_DISPATCHES, METRIC_DISPATCH_OUTCOME_LABEL => outcome).increment(1);
}

pub(crate) fn record_fallback(reason: &'static str) {
    metrics::counter!(METRIC_DISPATCH_FALLBACKS, METRIC_DISPATCH_FALLBACK_REASON_LABEL => reason)
        .increment(1);
}

#[cfg(feature = "function_call_metrics")]
pub(crate) struct HandlerCallMetricGuard {
    handler: String,
    policy: &'static str,
    start: std::time::Instant,
}

#[cfg(feature = "function_call_metrics")]
impl HandlerCallMetricGuard {
    #[instrument(skip_all, level=Level::DEBUG)]
    pub(crate) fn new(handler: String, policy: &'static str) -> Self {
        Self {
            handler,
            policy,
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "function_call_metrics")]
impl Drop for HandlerCallMetricGuard {
    #[instrument(skip_all, level=Level::DEBUG)]
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        metrics::histogram!(
            METRIC_HANDLER_CALL_DURATION,
            METRIC_HANDLER_LABEL => std::mem::take(&mut self.handler),
            METRIC_POLICY_LABEL => self.policy
        )
        .record(duration.as_micros() as f64);
    }
}
