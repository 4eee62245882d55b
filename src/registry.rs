//! Handler factory registry.
//!
//! Maps a `handler_type` string to a factory that reconstructs an
//! executable action from persisted parameters. Populated entirely by the
//! embedding application before restore runs; the engine core never
//! hardcodes a handler.

use crate::task::HandlerFactory;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Cloneable handle over the shared factory map.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: Arc<RwLock<HashMap<String, HandlerFactory>>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `handler_type`.
    pub fn register(&self, handler_type: &str, factory: HandlerFactory) {
        let mut map = self
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.insert(handler_type.to_owned(), factory);
    }

    /// Look up a factory. `None` when nothing is registered under the key.
    pub fn resolve(&self, handler_type: &str) -> Option<HandlerFactory> {
        let map = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.get(handler_type).cloned()
    }

    /// Registered handler types, for diagnostics.
    pub fn handler_types(&self) -> Vec<String> {
        let map = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut types: Vec<String> = map.keys().cloned().collect();
        types.sort();
        types
    }
}
