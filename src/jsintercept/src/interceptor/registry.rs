use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::handler::ScriptHandler;
use crate::key::InterceptionKey;
use crate::{Error, Result};

/// Concurrent map from interception key to handler.
///
/// Lookups never block on writes to unrelated keys; writes to the same key
/// are serialised by the map's shard locks.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: DashMap<InterceptionKey, Arc<ScriptHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `key`.
    ///
    /// Fails with [`Error::DuplicateRegistration`] if the key is taken and
    /// `replace` is false. With `replace` the new handler supersedes the old
    /// one, which is returned so its compiled function can be released.
    pub fn register(
        &self,
        key: InterceptionKey,
        handler: Arc<ScriptHandler>,
        replace: bool,
    ) -> Result<Option<Arc<ScriptHandler>>> {
        match self.handlers.entry(key) {
            Entry::Occupied(mut entry) => {
                if !replace {
                    return Err(Error::DuplicateRegistration(entry.key().clone()));
                }
                Ok(Some(entry.insert(handler)))
            }
            Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(None)
            }
        }
    }

    /// The handler registered for `key`.
    pub fn lookup(&self, key: &InterceptionKey) -> Option<Arc<ScriptHandler>> {
        self.handlers.get(key).map(|entry| entry.value().clone())
    }

    /// Removes and returns the handler for `key`.
    pub fn unregister(&self, key: &InterceptionKey) -> Option<Arc<ScriptHandler>> {
        self.handlers.remove(key).map(|(_, handler)| handler)
    }

    /// Removes every handler of the class `owner`, as when the class is unloaded.
    pub fn unregister_owner(&self, owner: &str) -> Vec<(InterceptionKey, Arc<ScriptHandler>)> {
        let keys: Vec<_> = self
            .handlers
            .iter()
            .filter(|entry| entry.key().owner() == owner)
            .map(|entry| entry.key().clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.handlers.remove(&key))
            .collect()
    }

    /// Returns `true` if a handler is registered for `key`.
    pub fn contains(&self, key: &InterceptionKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// The number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// All registered keys, in no particular order.
    pub fn keys(&self) -> Vec<InterceptionKey> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }
}
