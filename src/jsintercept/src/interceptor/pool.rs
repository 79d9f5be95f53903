//! The engine context pool.
//!
//! The pool is the sole owner of script engine contexts and the only source
//! of truth for whether one is still alive. Handlers remember the id of the
//! context they were compiled in and lease it back through the pool for every
//! invocation.
//!
//! Membership changes (creating, disposing) happen under one `RwLock`. Each
//! context has its own mutex and condvar, so a thread waiting for a specific
//! bound context never blocks threads working with other contexts. Lock order
//! is always membership, then slot, then the idle generation counter.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use jsintercept_common::ScriptEngine;
use serde::{Deserialize, Serialize};
use tracing::{Level, instrument};

use crate::interceptor::metrics::{METRIC_ENGINE_CONTEXT_DISPOSALS, MetricsGuard};
use crate::{Error, Result};

/// Identifies one engine context. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

#[cfg(test)]
impl ContextId {
    pub(crate) fn for_tests(id: u64) -> Self {
        ContextId(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Lifecycle of an engine context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Reserved, the engine is still creating it.
    Created,
    /// Usable.
    Active,
    /// Gone, along with everything compiled in it.
    Disposed,
}

/// How contexts are handed to threads that are not asking for a specific one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPolicy {
    /// Each thread keeps reusing the context created for it.
    #[default]
    ThreadAffine,
    /// Rotate over idle contexts, creating new ones only when none is idle.
    RoundRobin,
}

/// Which context an acquire wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// Whatever the assignment policy gives the calling thread.
    CurrentThread,
    /// Exactly this context.
    Bound(ContextId),
    /// Any idle context, or a new one.
    Any,
}

/// Pool sizing and waiting behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// The most contexts alive at once.
    pub max_contexts: usize,
    /// How long an acquire waits for a saturated pool.
    pub acquire_timeout: Duration,
    /// The assignment policy.
    pub policy: AssignmentPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_contexts: 4,
            acquire_timeout: Duration::from_secs(5),
            policy: AssignmentPolicy::ThreadAffine,
        }
    }
}

/// A live engine context.
pub(crate) struct EngineContext<C> {
    context: C,
    _metric_guard: MetricsGuard<EngineContext<C>>,
}

impl<C> EngineContext<C> {
    fn new(context: C) -> Self {
        Self {
            context,
            _metric_guard: MetricsGuard::new(),
        }
    }
}

impl<C> Drop for EngineContext<C> {
    fn drop(&mut self) {
        metrics::counter!(METRIC_ENGINE_CONTEXT_DISPOSALS).increment(1);
    }
}

struct SlotState<C> {
    lifecycle: ContextState,
    // None while leased out (or while being created).
    context: Option<EngineContext<C>>,
    holder: Option<ThreadId>,
}

struct Slot<C> {
    id: ContextId,
    state: Mutex<SlotState<C>>,
    returned: Condvar,
}

impl<C> Slot<C> {
    fn lock(&self) -> MutexGuard<'_, SlotState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Members<C> {
    slots: BTreeMap<ContextId, Arc<Slot<C>>>,
    affinity: HashMap<ThreadId, ContextId>,
    next_id: u64,
}

/// Owns every engine context and hands them out as [`PooledContext`] leases.
pub struct ContextPool<E: ScriptEngine> {
    engine: E,
    config: PoolConfig,
    members: RwLock<Members<E::Context>>,
    // bumped whenever a context becomes idle or a slot frees up
    idle: Mutex<u64>,
    idle_changed: Condvar,
    closed: AtomicBool,
    cursor: AtomicUsize,
}

impl<E: ScriptEngine> ContextPool<E> {
    /// Creates an empty pool. Contexts are created on demand.
    pub fn new(engine: E, config: PoolConfig) -> Self {
        Self {
            engine,
            config,
            members: RwLock::new(Members {
                slots: BTreeMap::new(),
                affinity: HashMap::new(),
                next_id: 0,
            }),
            idle: Mutex::new(0),
            idle_changed: Condvar::new(),
            closed: AtomicBool::new(false),
            cursor: AtomicUsize::new(0),
        }
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The script engine contexts are created with.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Leases a context, creating one if allowed, otherwise waiting up to the acquire timeout.
    #[instrument(err(Debug), skip(self), level = Level::TRACE)]
    pub fn acquire(&self, affinity: Affinity) -> Result<PooledContext<'_, E>> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        match (affinity, self.config.policy) {
            (Affinity::Bound(id), _) => self.acquire_bound(id, deadline),
            (Affinity::CurrentThread, AssignmentPolicy::ThreadAffine) => {
                self.acquire_affine(deadline)
            }
            (Affinity::CurrentThread, AssignmentPolicy::RoundRobin) => {
                self.acquire_shared(deadline, true)
            }
            (Affinity::Any, policy) => {
                self.acquire_shared(deadline, policy == AssignmentPolicy::RoundRobin)
            }
        }
    }

    /// Disposes a context, invalidating everything compiled in it.
    ///
    /// A leased context is dropped when its lease ends. Threads waiting for it
    /// wake up and see [`Error::DisposedContext`]. Returns `false` if the
    /// context was already gone.
    #[instrument(skip(self), level = Level::DEBUG)]
    pub fn dispose(&self, id: ContextId) -> bool {
        let slot = {
            let mut members = self.write_members();
            let Some(slot) = members.slots.remove(&id) else {
                return false;
            };
            members.affinity.retain(|_, bound| *bound != id);
            slot
        };

        let context = {
            let mut state = slot.lock();
            state.lifecycle = ContextState::Disposed;
            state.context.take()
        };
        slot.returned.notify_all();
        self.bump_idle();

        drop(context);
        tracing::debug!(context = %id, "disposed engine context");
        true
    }

    /// The lifecycle state of a context. Unknown ids are reported as disposed.
    pub fn state(&self, id: ContextId) -> ContextState {
        let slot = self.read_members().slots.get(&id).cloned();
        match slot {
            Some(slot) => slot.lock().lifecycle,
            None => ContextState::Disposed,
        }
    }

    /// The number of contexts currently alive, including ones being created.
    pub fn len(&self) -> usize {
        self.read_members().slots.len()
    }

    /// Returns `true` if no context is alive.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The ids of all live contexts.
    pub fn contexts(&self) -> Vec<ContextId> {
        self.read_members().slots.keys().copied().collect()
    }

    /// Disposes every context and closes the pool. Later acquires fail with [`Error::PoolClosed`].
    #[instrument(skip(self), level = Level::DEBUG)]
    pub fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let slots = {
            let mut members = self.write_members();
            members.affinity.clear();
            std::mem::take(&mut members.slots)
        };

        let mut contexts = Vec::with_capacity(slots.len());
        for slot in slots.values() {
            let mut state = slot.lock();
            state.lifecycle = ContextState::Disposed;
            contexts.extend(state.context.take());
            drop(state);
            slot.returned.notify_all();
        }
        self.bump_idle();

        if !slots.is_empty() {
            tracing::debug!(contexts = slots.len(), "tore down engine context pool");
        }
        drop(contexts);
    }

    fn acquire_bound(&self, id: ContextId, deadline: Instant) -> Result<PooledContext<'_, E>> {
        self.ensure_open()?;
        let slot = self
            .read_members()
            .slots
            .get(&id)
            .cloned()
            .ok_or(Error::DisposedContext(id))?;
        let me = thread::current().id();

        let mut state = slot.lock();
        loop {
            if state.lifecycle == ContextState::Disposed {
                return Err(Error::DisposedContext(id));
            }
            self.ensure_open()?;
            match state.holder {
                Some(holder) if holder == me => return Err(Error::ReentrantContext(id)),
                Some(_) => {}
                None => {
                    let Some(context) = state.context.take() else {
                        return Err(Error::DisposedContext(id));
                    };
                    state.holder = Some(me);
                    drop(state);
                    return Ok(PooledContext::new(self, slot, context));
                }
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(Error::PoolExhausted(self.config.acquire_timeout));
            };
            state = slot
                .returned
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn acquire_affine(&self, deadline: Instant) -> Result<PooledContext<'_, E>> {
        let me = thread::current().id();
        self.ensure_open()?;

        let bound = self.read_members().affinity.get(&me).copied();
        if let Some(id) = bound {
            match self.acquire_bound(id, deadline) {
                // the thread's own context is busy further up its stack, or gone;
                // use another one
                Err(Error::ReentrantContext(_) | Error::DisposedContext(_)) => {}
                other => return other,
            }
        }

        if bound.is_none()
            && let Some(lease) = self.try_create(Some(me))?
        {
            return Ok(lease);
        }
        self.acquire_shared(deadline, false)
    }

    fn acquire_shared(&self, deadline: Instant, rotate: bool) -> Result<PooledContext<'_, E>> {
        loop {
            self.ensure_open()?;
            let generation = *self.lock_idle();

            if let Some(lease) = self.try_take_idle(rotate) {
                return Ok(lease);
            }
            if let Some(lease) = self.try_create(None)? {
                return Ok(lease);
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(Error::PoolExhausted(self.config.acquire_timeout));
            };
            let idle = self.lock_idle();
            let (idle, timeout) = self
                .idle_changed
                .wait_timeout_while(idle, remaining, |current| *current == generation)
                .unwrap_or_else(PoisonError::into_inner);
            if timeout.timed_out() && *idle == generation {
                return Err(Error::PoolExhausted(self.config.acquire_timeout));
            }
        }
    }

    fn try_take_idle(&self, rotate: bool) -> Option<PooledContext<'_, E>> {
        let slots: Vec<_> = self.read_members().slots.values().cloned().collect();
        if slots.is_empty() {
            return None;
        }
        let start = if rotate {
            self.cursor.fetch_add(1, Ordering::Relaxed) % slots.len()
        } else {
            0
        };
        let me = thread::current().id();

        for offset in 0..slots.len() {
            let slot = &slots[(start + offset) % slots.len()];
            let mut state = slot.lock();
            if state.lifecycle != ContextState::Active || state.holder.is_some() {
                continue;
            }
            if let Some(context) = state.context.take() {
                state.holder = Some(me);
                drop(state);
                return Some(PooledContext::new(self, slot.clone(), context));
            }
        }
        None
    }

    fn try_create(&self, bind: Option<ThreadId>) -> Result<Option<PooledContext<'_, E>>> {
        let me = thread::current().id();
        let slot = {
            let mut members = self.write_members();
            self.ensure_open()?;
            if members.slots.len() >= self.config.max_contexts {
                return Ok(None);
            }
            members.next_id += 1;
            let id = ContextId(members.next_id);
            let slot = Arc::new(Slot {
                id,
                state: Mutex::new(SlotState {
                    lifecycle: ContextState::Created,
                    context: None,
                    holder: Some(me),
                }),
                returned: Condvar::new(),
            });
            members.slots.insert(id, slot.clone());
            if let Some(thread) = bind {
                members.affinity.insert(thread, id);
            }
            slot
        };

        let context = match self.engine.create_context() {
            Ok(context) => EngineContext::new(context),
            Err(err) => {
                self.forget(slot.id);
                slot.lock().lifecycle = ContextState::Disposed;
                self.bump_idle();
                tracing::error!(engine = self.engine.name(), "failed to create engine context: {err}");
                return Err(Error::Engine(err.to_string()));
            }
        };

        let mut state = slot.lock();
        if state.lifecycle == ContextState::Disposed {
            // disposed or torn down while the engine was creating it
            return Err(Error::DisposedContext(slot.id));
        }
        state.lifecycle = ContextState::Active;
        drop(state);

        tracing::debug!(context = %slot.id, engine = self.engine.name(), "created engine context");
        Ok(Some(PooledContext::new(self, slot, context)))
    }

    fn give_back(&self, slot: &Slot<E::Context>, context: EngineContext<E::Context>, discard: bool) {
        let mut state = slot.lock();
        state.holder = None;
        let disposed = discard
            || state.lifecycle == ContextState::Disposed
            || self.closed.load(Ordering::SeqCst);
        if disposed {
            state.lifecycle = ContextState::Disposed;
        } else {
            state.context = Some(context);
        }
        drop(state);

        slot.returned.notify_all();
        if disposed {
            self.forget(slot.id);
            tracing::debug!(context = %slot.id, "disposed engine context on release");
        }
        self.bump_idle();
    }

    fn forget(&self, id: ContextId) {
        let mut members = self.write_members();
        members.slots.remove(&id);
        members.affinity.retain(|_, bound| *bound != id);
    }

    fn bump_idle(&self) {
        *self.lock_idle() += 1;
        self.idle_changed.notify_all();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }
        Ok(())
    }

    fn lock_idle(&self) -> MutexGuard<'_, u64> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_members(&self) -> std::sync::RwLockReadGuard<'_, Members<E::Context>> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_members(&self) -> std::sync::RwLockWriteGuard<'_, Members<E::Context>> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: ScriptEngine> Drop for ContextPool<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<E: ScriptEngine> fmt::Debug for ContextPool<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("engine", &self.engine.name())
            .field("config", &self.config)
            .field("contexts", &self.len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A leased engine context. Dropping the lease returns the context to the pool.
pub struct PooledContext<'a, E: ScriptEngine> {
    pool: &'a ContextPool<E>,
    slot: Arc<Slot<E::Context>>,
    context: ManuallyDrop<EngineContext<E::Context>>,
    discard: bool,
}

impl<'a, E: ScriptEngine> PooledContext<'a, E> {
    fn new(
        pool: &'a ContextPool<E>,
        slot: Arc<Slot<E::Context>>,
        context: EngineContext<E::Context>,
    ) -> Self {
        Self {
            pool,
            slot,
            context: ManuallyDrop::new(context),
            discard: false,
        }
    }

    /// The id of the leased context.
    pub fn id(&self) -> ContextId {
        self.slot.id
    }

    /// Disposes the context instead of returning it when the lease ends.
    ///
    /// Used after a forced interruption, when the engine state is undefined.
    pub fn discard(&mut self) {
        self.discard = true;
    }
}

impl<E: ScriptEngine> Deref for PooledContext<'_, E> {
    type Target = E::Context;

    fn deref(&self) -> &Self::Target {
        &self.context.context
    }
}

impl<E: ScriptEngine> DerefMut for PooledContext<'_, E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.context.context
    }
}

impl<E: ScriptEngine> Drop for PooledContext<'_, E> {
    fn drop(&mut self) {
        // SAFETY: `context` is never touched again after being taken here.
        let context = unsafe { ManuallyDrop::take(&mut self.context) };
        self.pool.give_back(&self.slot, context, self.discard);
    }
}

impl<E: ScriptEngine> fmt::Debug for PooledContext<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledContext")
            .field("id", &self.slot.id)
            .field("discard", &self.discard)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::sync::mpsc;

    use jsintercept_common::{
        EngineError, FunctionHandle, HostCallback, InterruptHandle, MarshalledValue, ScriptContext,
    };

    use super::*;

    #[derive(Default)]
    struct FakeEngine {
        created: Arc<AtomicU64>,
        fail: bool,
    }

    struct FakeContext {
        serial: u64,
        interrupt: InterruptHandle,
    }

    impl ScriptEngine for FakeEngine {
        type Context = FakeContext;

        fn create_context(&self) -> std::result::Result<FakeContext, EngineError> {
            if self.fail {
                return Err(EngineError::Internal("no memory".into()));
            }
            Ok(FakeContext {
                serial: self.created.fetch_add(1, Ordering::SeqCst) + 1,
                interrupt: InterruptHandle::new(),
            })
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    impl ScriptContext for FakeContext {
        fn compile(&mut self, _: &str, _: &str) -> std::result::Result<FunctionHandle, EngineError> {
            Ok(FunctionHandle(1))
        }

        fn invoke(
            &mut self,
            _: FunctionHandle,
            _: MarshalledValue,
            _: Vec<MarshalledValue>,
            _: Option<HostCallback>,
        ) -> std::result::Result<MarshalledValue, EngineError> {
            Ok(MarshalledValue::Integer(self.serial as i64))
        }

        fn release(&mut self, _: FunctionHandle) -> bool {
            true
        }

        fn interrupt_handle(&self) -> InterruptHandle {
            self.interrupt.clone()
        }
    }

    fn pool(max_contexts: usize, timeout_ms: u64, policy: AssignmentPolicy) -> ContextPool<FakeEngine> {
        ContextPool::new(
            FakeEngine::default(),
            PoolConfig {
                max_contexts,
                acquire_timeout: Duration::from_millis(timeout_ms),
                policy,
            },
        )
    }

    #[test]
    fn threads_reuse_their_own_context() {
        let pool = pool(4, 100, AssignmentPolicy::ThreadAffine);
        let first = pool.acquire(Affinity::CurrentThread).unwrap().id();
        let second = pool.acquire(Affinity::CurrentThread).unwrap().id();
        assert_eq!(first, second);
        assert_eq!(pool.state(first), ContextState::Active);

        thread::scope(|s| {
            let other = s
                .spawn(|| pool.acquire(Affinity::CurrentThread).unwrap().id())
                .join()
                .unwrap();
            assert_ne!(other, first);
        });
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn saturated_pool_makes_the_second_thread_wait() {
        let pool = pool(1, 5_000, AssignmentPolicy::ThreadAffine);
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let pool = &pool;

        thread::scope(|s| {
            let holder = s.spawn(move || {
                let lease = pool.acquire(Affinity::CurrentThread).unwrap();
                held_tx.send(lease.id()).unwrap();
                release_rx.recv().unwrap();
            });

            let held = held_rx.recv().unwrap();
            let waiter = s.spawn(move || {
                let start = Instant::now();
                let lease = pool.acquire(Affinity::CurrentThread).unwrap();
                (lease.id(), start.elapsed())
            });

            thread::sleep(Duration::from_millis(100));
            release_tx.send(()).unwrap();
            holder.join().unwrap();

            let (got, waited) = waiter.join().unwrap();
            assert_eq!(got, held);
            assert!(waited >= Duration::from_millis(90), "waited only {waited:?}");
        });
        assert_eq!(pool.engine().created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn saturated_pool_times_out() {
        let pool = pool(1, 50, AssignmentPolicy::ThreadAffine);
        let _held = pool.acquire(Affinity::CurrentThread).unwrap();

        thread::scope(|s| {
            let err = s
                .spawn(|| pool.acquire(Affinity::Any).unwrap_err())
                .join()
                .unwrap();
            assert!(matches!(err, Error::PoolExhausted(_)), "{err}");
        });
    }

    #[test]
    fn reentrant_acquire_fails_instead_of_deadlocking() {
        let pool = pool(1, 1_000, AssignmentPolicy::ThreadAffine);
        let lease = pool.acquire(Affinity::CurrentThread).unwrap();
        let err = pool.acquire(Affinity::Bound(lease.id())).unwrap_err();
        assert!(matches!(err, Error::ReentrantContext(id) if id == lease.id()));
    }

    #[test]
    fn disposal_invalidates_the_context() {
        let pool = pool(2, 100, AssignmentPolicy::ThreadAffine);
        let id = pool.acquire(Affinity::CurrentThread).unwrap().id();

        assert!(pool.dispose(id));
        assert!(!pool.dispose(id));
        assert_eq!(pool.state(id), ContextState::Disposed);
        assert!(matches!(pool.acquire(Affinity::Bound(id)), Err(Error::DisposedContext(d)) if d == id));

        // the thread gets a fresh context
        let fresh = pool.acquire(Affinity::CurrentThread).unwrap().id();
        assert_ne!(fresh, id);
    }

    #[test]
    fn disposal_wakes_waiters() {
        let pool = pool(1, 5_000, AssignmentPolicy::ThreadAffine);
        let lease = pool.acquire(Affinity::CurrentThread).unwrap();
        let id = lease.id();

        thread::scope(|s| {
            let waiter = s.spawn(|| pool.acquire(Affinity::Bound(id)).map(|l| l.id()));
            thread::sleep(Duration::from_millis(50));
            pool.dispose(id);
            let result = waiter.join().unwrap();
            assert!(matches!(result, Err(Error::DisposedContext(d)) if d == id));
        });

        drop(lease);
        assert!(pool.is_empty());
    }

    #[test]
    fn discarded_leases_dispose_their_context() {
        let pool = pool(1, 100, AssignmentPolicy::ThreadAffine);
        let mut lease = pool.acquire(Affinity::CurrentThread).unwrap();
        let id = lease.id();
        lease.discard();
        drop(lease);

        assert_eq!(pool.state(id), ContextState::Disposed);
        assert_ne!(pool.acquire(Affinity::CurrentThread).unwrap().id(), id);
    }

    #[test]
    fn round_robin_rotates_over_idle_contexts() {
        let pool = pool(3, 100, AssignmentPolicy::RoundRobin);
        {
            let _a = pool.acquire(Affinity::Any).unwrap();
            let _b = pool.acquire(Affinity::Any).unwrap();
        }
        assert_eq!(pool.len(), 2);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(pool.acquire(Affinity::CurrentThread).unwrap().id());
        }
        // only creates when nothing is idle
        assert_eq!(pool.len(), 2);
        assert_ne!(seen[0], seen[1]);
        assert_eq!(seen[0], seen[2]);
    }

    #[test]
    fn teardown_closes_the_pool() {
        let pool = pool(2, 100, AssignmentPolicy::ThreadAffine);
        let id = pool.acquire(Affinity::CurrentThread).unwrap().id();
        pool.teardown();

        assert!(pool.is_empty());
        assert_eq!(pool.state(id), ContextState::Disposed);
        assert!(matches!(pool.acquire(Affinity::Any), Err(Error::PoolClosed)));
    }

    #[test]
    fn engine_failures_do_not_leak_slots() {
        let pool = ContextPool::new(
            FakeEngine {
                fail: true,
                ..Default::default()
            },
            PoolConfig::default(),
        );
        assert!(matches!(pool.acquire(Affinity::CurrentThread), Err(Error::Engine(_))));
        assert!(pool.is_empty());
    }

    #[test]
    fn leases_deref_to_the_engine_context() {
        let pool = pool(1, 100, AssignmentPolicy::ThreadAffine);
        let mut lease = pool.acquire(Affinity::Any).unwrap();
        let result = lease.invoke(FunctionHandle(1), MarshalledValue::Null, vec![], None);
        assert_eq!(result, Ok(MarshalledValue::Integer(1)));
    }
}
