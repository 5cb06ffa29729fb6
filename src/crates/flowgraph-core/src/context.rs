//! Run-scoped key/value context
//!
//! State that does not travel over edges (counters, session ids, shared flags)
//! lives here. The store belongs to one graph run and is only written by that
//! run's loop; units see a working copy through
//! [`StepContext`](crate::StepContext) that is merged back when their step
//! commits.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextStore {
    values: BTreeMap<String, Value>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set `key`, returning the previous value
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Append to the list stored at `key`.
    ///
    /// A missing key becomes `[value]`; a non-list value is wrapped into a
    /// list first.
    pub fn append(&mut self, key: impl Into<String>, value: Value) {
        let slot = self.values.entry(key.into()).or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(value),
            other => {
                let previous = other.take();
                *other = Value::Array(vec![previous, value]);
            }
        }
    }

    /// Add `by` to the integer at `key` (missing counts as 0) and return the result
    pub fn increment(&mut self, key: &str, by: i64) -> Result<i64> {
        let current = match self.values.get(key) {
            None | Some(Value::Null) => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                GraphError::Validation(format!("context key '{}' does not hold an integer", key))
            })?,
        };
        let next = current + by;
        self.values.insert(key.to_string(), Value::from(next));
        Ok(next)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> + '_ {
        self.values.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.values
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_set() {
        let mut ctx = ContextStore::new();
        assert!(ctx.set("session_id", json!("s-1")).is_none());
        assert_eq!(ctx.set("session_id", json!("s-2")), Some(json!("s-1")));
        assert_eq!(ctx.get("session_id"), Some(&json!("s-2")));
    }

    #[test]
    fn test_append_promotes_scalars() {
        let mut ctx = ContextStore::new();
        ctx.append("log", json!("first"));
        assert_eq!(ctx.get("log"), Some(&json!(["first"])));

        ctx.set("flag", json!(true));
        ctx.append("flag", json!(false));
        assert_eq!(ctx.get("flag"), Some(&json!([true, false])));
    }

    #[test]
    fn test_increment() {
        let mut ctx = ContextStore::new();
        assert_eq!(ctx.increment("router_iteration", 1).unwrap(), 1);
        assert_eq!(ctx.increment("router_iteration", 2).unwrap(), 3);

        ctx.set("name", json!("x"));
        assert!(ctx.increment("name", 1).is_err());
        assert_eq!(ctx.get("name"), Some(&json!("x")));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let mut ctx = ContextStore::new();
        ctx.set("b", json!(2));
        ctx.set("a", json!(1));
        assert_eq!(serde_json::to_value(&ctx).unwrap(), json!({"a": 1, "b": 2}));
    }
}
