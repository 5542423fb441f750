//! Keyed state storage behind the `context`, `flow` and `global` capabilities.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use parking_lot::RwLock;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ContextStoreError {
    #[error("Context store unavailable: {0}")]
    Unavailable(String),
    #[error("Context value for key '{key}' is not storable: {reason}")]
    NotStorable { key: String, reason: String },
}

/// Which mapping a key lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextScope {
    /// Private to one unit of one flow.
    Node { flow_id: String, node_id: String },
    /// Shared by every unit of one flow.
    Flow(String),
    /// Shared by every unit.
    Global,
}

impl fmt::Display for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextScope::Node { flow_id, node_id } => write!(f, "node:{}:{}", flow_id, node_id),
            ContextScope::Flow(id) => write!(f, "flow:{}", id),
            ContextScope::Global => write!(f, "global"),
        }
    }
}

/// Backing for the state-store capabilities.
///
/// Calls are made from a unit's runtime thread and must not block on async work.
/// No transactional guarantee is assumed beyond single-key operations.
pub trait ContextStore: Send + Sync {
    fn get(&self, scope: &ContextScope, key: &str) -> Result<Option<Value>, ContextStoreError>;

    /// Store `value` under `key`; `None` removes the key.
    fn set(
        &self,
        scope: &ContextScope,
        key: &str,
        value: Option<Value>,
    ) -> Result<(), ContextStoreError>;

    fn keys(&self, scope: &ContextScope) -> Result<Vec<String>, ContextStoreError>;
}

/// Process-local store.
pub struct InMemoryContextStore {
    scopes: RwLock<HashMap<ContextScope, BTreeMap<String, Value>>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore for InMemoryContextStore {
    fn get(&self, scope: &ContextScope, key: &str) -> Result<Option<Value>, ContextStoreError> {
        let guard = self.scopes.read();
        Ok(guard.get(scope).and_then(|values| values.get(key)).cloned())
    }

    fn set(
        &self,
        scope: &ContextScope,
        key: &str,
        value: Option<Value>,
    ) -> Result<(), ContextStoreError> {
        let mut guard = self.scopes.write();
        match value {
            Some(value) => {
                guard
                    .entry(scope.clone())
                    .or_default()
                    .insert(key.to_string(), value);
            }
            None => {
                if let Some(values) = guard.get_mut(scope) {
                    values.remove(key);
                    if values.is_empty() {
                        guard.remove(scope);
                    }
                }
            }
        }
        Ok(())
    }

    fn keys(&self, scope: &ContextScope) -> Result<Vec<String>, ContextStoreError> {
        let guard = self.scopes.read();
        Ok(guard
            .get(scope)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default())
    }
}
