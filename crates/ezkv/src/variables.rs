/*
 * variables.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Variable lookup for interpolation.
//!
//! [`Variables`] is a fallback lookup function used only by the
//! interpolator. Unlike the loaded key values, variables never appear in
//! the final output; this is what lets a load use, say, the process
//! environment for `${...}` references without the final config containing
//! every environment variable.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::environment::Environment;

/// An ordered fallback lookup from key to value.
pub trait Variables {
    /// Retrieve the value mapped to `key`, or `None` when unbound.
    fn get_value(&self, key: &str) -> Option<String>;

    /// Find the first bound entry among `names`, returning the matching
    /// key and its value.
    fn find_entry(&self, names: &[&str]) -> Option<(String, String)> {
        for name in names {
            if let Some(v) = self.get_value(name) {
                return Some((name.to_string(), v));
            }
        }
        None
    }
}

impl Variables for IndexMap<String, String> {
    fn get_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl Variables for HashMap<String, String> {
    fn get_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<F> Variables for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get_value(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Variables with no bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyVariables;

impl Variables for EmptyVariables {
    fn get_value(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Checks each chained lookup in order and returns the first hit.
pub struct ChainedVariables {
    chain: Vec<Box<dyn Variables>>,
}

impl ChainedVariables {
    /// Chain lookups in the given order.
    pub fn new(chain: Vec<Box<dyn Variables>>) -> ChainedVariables {
        ChainedVariables { chain }
    }
}

impl Variables for ChainedVariables {
    fn get_value(&self, key: &str) -> Option<String> {
        self.chain.iter().find_map(|v| v.get_value(key))
    }
}

/// Builder for a composite [`Variables`] chain. Resolution order is the
/// order of the `add` calls: earlier sources win.
#[derive(Default)]
pub struct VariablesBuilder {
    entries: IndexMap<String, String>,
    suppliers: Vec<Box<dyn Variables>>,
}

impl VariablesBuilder {
    /// Create an empty builder.
    pub fn new() -> VariablesBuilder {
        VariablesBuilder::default()
    }

    /// Add a single binding. All single bindings sit at the front of the
    /// chain regardless of interleaving with supplier adds.
    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> VariablesBuilder {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Add a map of bindings as one chained lookup.
    pub fn map(mut self, map: IndexMap<String, String>) -> VariablesBuilder {
        self.suppliers.push(Box::new(map));
        self
    }

    /// Add an arbitrary lookup to the chain.
    pub fn add(mut self, variables: impl Variables + 'static) -> VariablesBuilder {
        self.suppliers.push(Box::new(variables));
        self
    }

    /// Build the chain.
    pub fn build(self) -> ChainedVariables {
        let mut chain: Vec<Box<dyn Variables>> = Vec::with_capacity(self.suppliers.len() + 1);
        if !self.entries.is_empty() {
            chain.push(Box::new(self.entries));
        }
        chain.extend(self.suppliers);
        ChainedVariables::new(chain)
    }
}

/// Variables backed by the environment's system properties.
pub fn of_system_properties(env: Arc<dyn Environment>) -> impl Variables {
    move |key: &str| env.system_properties().get(key).cloned()
}

/// Variables backed by the environment's process environment variables.
pub fn of_system_env(env: Arc<dyn Environment>) -> impl Variables {
    move |key: &str| env.system_env().get(key).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order() {
        let mut first = IndexMap::new();
        first.insert("a".to_string(), "1".to_string());
        let mut second = IndexMap::new();
        second.insert("a".to_string(), "2".to_string());
        second.insert("b".to_string(), "3".to_string());

        let vars = VariablesBuilder::new().map(first).map(second).build();
        assert_eq!(vars.get_value("a").as_deref(), Some("1"));
        assert_eq!(vars.get_value("b").as_deref(), Some("3"));
        assert_eq!(vars.get_value("c"), None);
    }

    #[test]
    fn test_entries_take_precedence() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), "map".to_string());
        let vars = VariablesBuilder::new().map(map).entry("a", "entry").build();
        assert_eq!(vars.get_value("a").as_deref(), Some("entry"));
    }

    #[test]
    fn test_find_entry() {
        let vars = VariablesBuilder::new().entry("profiles", "dev,prod").build();
        let (key, value) = vars.find_entry(&["profile", "profiles"]).unwrap();
        assert_eq!(key, "profiles");
        assert_eq!(value, "dev,prod");
        assert!(vars.find_entry(&["nope"]).is_none());
    }

    #[test]
    fn test_closure_variables() {
        let vars = |key: &str| {
            if key == "x" {
                Some("y".to_string())
            } else {
                None
            }
        };
        assert_eq!(vars.get_value("x").as_deref(), Some("y"));
        assert_eq!(vars.get_value("z"), None);
    }
}
