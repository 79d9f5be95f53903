//! Execution monitoring for script handlers.
//!
//! [`ExecutionMonitor`] is what users implement: a `get_monitor()` returning a
//! future that completes when the handler should be stopped, plus a `name()`.
//! The dispatcher is bounded on the sealed [`MonitorSet`] instead, which every
//! `ExecutionMonitor` and every tuple of up to five of them satisfies. A tuple
//! races its members with OR semantics; the first one to fire wins and its
//! name is logged and counted.
//!
//! When a monitor fires the dispatcher kills the leased context's
//! [`InterruptHandle`](jsintercept_common::InterruptHandle). The engine aborts
//! the script, the context is discarded, and the dispatch falls back to the
//! original method like any other infrastructure fault.
//!
//! # Built-in Monitors
//!
//! - [`WallClockMonitor`] - stops a handler after a wall-clock timeout
//!   (requires the `monitor-wall-clock` feature)
//!
//! # Custom Monitors
//!
//! ```text
//! use jsintercept::ExecutionMonitor;
//! use std::future::Future;
//!
//! struct Deadline { limit: std::time::Duration }
//!
//! impl ExecutionMonitor for Deadline {
//!     fn get_monitor(&self) -> anyhow::Result<impl Future<Output = ()> + Send + 'static> {
//!         let limit = self.limit;
//!         Ok(async move { jsintercept::monitor::sleep(limit).await })
//!     }
//!
//!     fn name(&self) -> &'static str { "deadline" }
//! }
//! ```
//!
//! # Fail-Closed Semantics
//!
//! If a monitor fails to initialize the handler is not run. The dispatch is
//! treated as an infrastructure fault and falls back to the original method.
//!
//! # Runtime Configuration
//!
//! Monitor futures run on a shared runtime sized by `JSINTERCEPT_MONITOR_THREADS`
//! (default 2), read once when the first monitor is armed.

use std::future::Future;
use std::pin::Pin;

use crate::interceptor::metrics::{METRIC_MONITOR_TERMINATIONS, METRIC_MONITOR_TYPE_LABEL};

fn record_monitor_triggered(triggered_by: &'static str) {
    metrics::counter!(
        METRIC_MONITOR_TERMINATIONS,
        METRIC_MONITOR_TYPE_LABEL => triggered_by
    )
    .increment(1);

    tracing::warn!(monitor = triggered_by, "execution monitor fired, interrupting handler");
}

/// A monitor that enforces limits on a single handler invocation.
///
/// # Contract
///
/// - **Method body** (sync): runs on the dispatching thread. Return `Err` to
///   fail closed; the handler is not run.
/// - **Returned future** (async): spawned on the monitor runtime. Stays pending
///   while within limits and completes when the handler should be interrupted.
///   It is aborted if the handler finishes first.
pub trait ExecutionMonitor: Send + Sync {
    /// Prepares the monitoring future for one invocation.
    fn get_monitor(&self) -> anyhow::Result<impl Future<Output = ()> + Send + 'static>;

    /// Name used in logs and the `monitor_type` metric label.
    fn name(&self) -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// A set of monitors raced as one. Sealed; derived for every
/// [`ExecutionMonitor`] and for tuples of up to five of them.
pub trait MonitorSet: private::Sealed + Send + Sync {
    /// Builds a future that completes when the first monitor in the set fires.
    ///
    /// Every member's `get_monitor()` is called on the calling thread.
    fn to_race(&self) -> anyhow::Result<Pin<Box<dyn Future<Output = ()> + Send>>>;
}

impl<M: ExecutionMonitor> private::Sealed for M {}

impl<M: ExecutionMonitor> MonitorSet for M {
    fn to_race(&self) -> anyhow::Result<Pin<Box<dyn Future<Output = ()> + Send>>> {
        let future = self.get_monitor()?;
        let name = self.name();
        Ok(Box::pin(async move {
            future.await;
            record_monitor_triggered(name);
        }))
    }
}

macro_rules! impl_monitor_set_tuple {
    (($($p:ident: $P:ident),+)) => {
        impl<$($P: ExecutionMonitor),+> private::Sealed for ($($P,)+) {}

        impl<$($P: ExecutionMonitor),+> MonitorSet for ($($P,)+) {
            fn to_race(&self) -> anyhow::Result<Pin<Box<dyn Future<Output = ()> + Send>>> {
                let ($($p,)+) = &self;
                $(let $p = ($p.get_monitor()?, $p.name());)+

                Ok(Box::pin(async move {
                    let winner = tokio::select! {
                        $(_ = $p.0 => $p.1,)+
                    };
                    record_monitor_triggered(winner);
                }))
            }
        }
    };
}

impl_monitor_set_tuple!((m0: M0));
impl_monitor_set_tuple!((m0: M0, m1: M1));
impl_monitor_set_tuple!((m0: M0, m1: M1, m2: M2));
impl_monitor_set_tuple!((m0: M0, m1: M1, m2: M2, m3: M3));
impl_monitor_set_tuple!((m0: M0, m1: M1, m2: M2, m3: M3, m4: M4));

#[cfg(feature = "monitor-wall-clock")]
mod wall_clock;
#[cfg(feature = "monitor-wall-clock")]
pub use wall_clock::WallClockMonitor;

pub(crate) mod runtime;

/// Async sleep for custom monitors, so they need not depend on tokio directly.
pub use tokio::time::sleep;
