//! Shared Tokio runtime for execution monitors.
//!
//! Monitor futures are spawned here so that arming a monitor never starts a
//! new OS thread. The worker count comes from `JSINTERCEPT_MONITOR_THREADS`,
//! which must be set before the first monitored dispatch.

use std::sync::LazyLock;

use tokio::runtime::Runtime;

/// Environment variable sizing the monitor runtime.
pub(crate) const ENV_MONITOR_THREADS: &str = "JSINTERCEPT_MONITOR_THREADS";

const DEFAULT_MONITOR_RUNTIME_WORKERS: usize = 2;

// A failed build is cached as `None`; monitored dispatches then fail closed.
static MONITOR_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    let workers = std::env::var(ENV_MONITOR_THREADS)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_MONITOR_RUNTIME_WORKERS);

    match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("jsintercept-monitor")
        .enable_time()
        .build()
    {
        Ok(rt) => {
            tracing::debug!(workers, "initialized monitor runtime");
            Some(rt)
        }
        Err(e) => {
            tracing::error!("failed to create execution monitor runtime: {e}. Monitors will be unavailable.");
            None
        }
    }
});

/// The shared monitor runtime, or `None` if it could not be created.
pub(crate) fn get_monitor_runtime() -> Option<&'static Runtime> {
    MONITOR_RUNTIME.as_ref()
}
