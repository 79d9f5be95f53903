//! Wall-clock time based execution monitor.

use std::future::Future;
use std::time::Duration;

use super::ExecutionMonitor;

/// Interrupts a handler that runs longer than a fixed wall-clock timeout.
///
/// Elapsed time includes time the handler spends blocked inside host calls,
/// such as an `Around` proxy waiting on a slow original method.
///
/// ```text
/// let monitor = WallClockMonitor::new(Duration::from_millis(250))?;
/// let result = interceptor.dispatch_with_monitor(&key, None, &args, Some(&original), &monitor)?;
/// ```
#[derive(Debug, Clone)]
pub struct WallClockMonitor {
    timeout: Duration,
}

impl WallClockMonitor {
    /// Creates a monitor with the given timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `timeout` is zero.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!timeout.is_zero(), "timeout must be non-zero");
        Ok(Self { timeout })
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl ExecutionMonitor for WallClockMonitor {
    fn get_monitor(&self) -> anyhow::Result<impl Future<Output = ()> + Send + 'static> {
        let timeout = self.timeout;
        Ok(async move {
            super::sleep(timeout).await;
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "wall-clock timeout exceeded, interrupting handler"
            );
        })
    }

    fn name(&self) -> &'static str {
        "wall-clock"
    }
}
