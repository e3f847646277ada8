/*
 * kvs.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Ordered collections of key-values.
//!
//! [`KeyValues`] is an ordered sequence of [`KeyValue`] entries. Duplicate
//! keys are preserved because they carry order semantics: collapsing to a
//! map keeps the *last* value for a key, at the position of the key's first
//! appearance.
//!
//! The collection is owned and materialized; `memoize` exists for API
//! fidelity and is idempotent. Combinators return new collections.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::error::Result;
use crate::interpolate::Interpolator;
use crate::kv::{KeyValue, KeyValueFlags, Meta, Source};
use crate::media::KeyValuesMedia;
use crate::properties;
use crate::uri::Uri;
use crate::variables::Variables;

/// An ordered, duplicate-preserving sequence of key-values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues {
    items: Vec<KeyValue>,
}

impl KeyValues {
    /// An empty collection.
    pub fn empty() -> KeyValues {
        KeyValues { items: Vec::new() }
    }

    /// A collection holding a single entry.
    pub fn of(kv: KeyValue) -> KeyValues {
        KeyValues { items: vec![kv] }
    }

    /// Build from already-constructed entries.
    pub fn from_entries(items: Vec<KeyValue>) -> KeyValues {
        KeyValues { items }
    }

    /// A builder for entries without a source.
    pub fn builder() -> KeyValuesBuilder {
        KeyValuesBuilder::new()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, KeyValue> {
        self.items.iter()
    }

    /// Transform each entry.
    pub fn map(&self, mut f: impl FnMut(&KeyValue) -> KeyValue) -> KeyValues {
        KeyValues {
            items: self.items.iter().map(|kv| f(kv)).collect(),
        }
    }

    /// Keep entries matching the predicate.
    pub fn filter(&self, mut predicate: impl FnMut(&KeyValue) -> bool) -> KeyValues {
        KeyValues {
            items: self.items.iter().filter(|kv| predicate(kv)).cloned().collect(),
        }
    }

    /// Replace each entry by a sequence of entries.
    pub fn flat_map(&self, mut f: impl FnMut(&KeyValue) -> KeyValues) -> KeyValues {
        KeyValues {
            items: self.items.iter().flat_map(|kv| f(kv).items).collect(),
        }
    }

    /// The final entry, if any. Ergonomic because later keys override
    /// earlier keys of the same name.
    pub fn last(&self) -> Option<&KeyValue> {
        self.items.last()
    }

    /// Expand every entry's value against `vars`, failing on unresolvable
    /// references. `raw` values are untouched.
    pub fn expand(&self, vars: &dyn Variables) -> Result<KeyValues> {
        self.expand_with(vars, false, true)
    }

    /// Expand and collapse to a map (last value wins per key).
    pub fn interpolate(&self, vars: &dyn Variables) -> Result<IndexMap<String, String>> {
        Ok(self.expand(vars)?.to_map())
    }

    /// Expansion with explicit locality and strictness.
    ///
    /// `local` means every entry comes from the same resource, which
    /// permits expanding SENSITIVE values. Lenient mode leaves
    /// unresolvable references in place for a later pass.
    pub(crate) fn expand_with(
        &self,
        vars: &dyn Variables,
        local: bool,
        strict: bool,
    ) -> Result<KeyValues> {
        // Raw view of the whole batch, last occurrence winning. An entry
        // never sees its own raw value while it expands.
        let mut flat: HashMap<String, String> = HashMap::with_capacity(self.items.len());
        for kv in &self.items {
            flat.insert(kv.key().to_string(), kv.raw().to_string());
        }
        let mut resolved: IndexMap<String, String> = IndexMap::with_capacity(self.items.len());
        let mut out = Vec::with_capacity(self.items.len());

        for kv in &self.items {
            let own = flat.remove(kv.key());
            let value = if kv.is_no_interpolation() || (kv.is_sensitive() && !local) {
                kv.value().to_string()
            } else if kv.raw().contains('$') {
                let resolver = BatchVariables {
                    resolved: &resolved,
                    flat: &flat,
                    outer: vars,
                };
                let interpolator = Interpolator::new(&resolver);
                if strict {
                    interpolator.interpolate(kv.key(), kv.raw())?
                } else {
                    interpolator.interpolate_lenient(kv.key(), kv.raw())
                }
            } else {
                kv.raw().to_string()
            };
            resolved.insert(kv.key().to_string(), value.clone());
            out.push(kv.with_expanded(value));
            if let Some(own) = own {
                flat.insert(kv.key().to_string(), own);
            }
        }
        Ok(KeyValues { items: out })
    }

    /// Materialize the collection. Idempotent; kept so call sites read
    /// the same as with a lazy stream.
    pub fn memoize(&self) -> KeyValues {
        self.clone()
    }

    /// Redacted view: sensitive values print as `REDACTED`.
    pub fn redact(&self) -> KeyValues {
        self.map(KeyValue::redact)
    }

    /// Collapse to a map of expanded values. Last value wins; key order
    /// is the order of first appearance. No interpolation happens here.
    pub fn to_map(&self) -> IndexMap<String, String> {
        let mut map = IndexMap::with_capacity(self.items.len());
        for kv in &self.items {
            map.insert(kv.key().to_string(), kv.expanded().to_string());
        }
        map
    }

    /// Format with the given media's formatter.
    pub fn format(&self, media: &dyn KeyValuesMedia) -> Result<String> {
        let mut out = String::new();
        media.format(&mut out, self)?;
        Ok(out)
    }
}

impl<'a> IntoIterator for &'a KeyValues {
    type Item = &'a KeyValue;
    type IntoIter = std::slice::Iter<'a, KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for KeyValues {
    type Item = KeyValue;
    type IntoIter = std::vec::IntoIter<KeyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl fmt::Display for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut body = String::new();
        // Display never leaks sensitive values.
        if properties::format(&mut body, &self.redact()).is_err() {
            return Err(fmt::Error);
        }
        write!(f, "KeyValues[\n{body}]")
    }
}

/// Lookup used while a batch expands: resolved values first, then the raw
/// view of the batch, then the outer chain.
struct BatchVariables<'a> {
    resolved: &'a IndexMap<String, String>,
    flat: &'a HashMap<String, String>,
    outer: &'a dyn Variables,
}

impl Variables for BatchVariables<'_> {
    fn get_value(&self, key: &str) -> Option<String> {
        self.resolved
            .get(key)
            .or_else(|| self.flat.get(key))
            .cloned()
            .or_else(|| self.outer.get_value(key))
    }
}

/// Builds [`KeyValues`] entries that share a source and default flags.
pub struct KeyValuesBuilder {
    uri: Uri,
    reference: Option<KeyValue>,
    flags: KeyValueFlags,
    next_index: usize,
    sourced: bool,
    items: Vec<KeyValue>,
}

impl KeyValuesBuilder {
    /// A builder whose entries have no source.
    pub fn new() -> KeyValuesBuilder {
        KeyValuesBuilder {
            uri: Source::null_uri(),
            reference: None,
            flags: KeyValueFlags::empty(),
            next_index: 0,
            sourced: false,
            items: Vec::new(),
        }
    }

    /// A builder whose entries carry the given source URI and declaring
    /// key-value.
    pub fn with_source(uri: Uri, reference: Option<KeyValue>) -> KeyValuesBuilder {
        KeyValuesBuilder {
            uri,
            reference,
            flags: KeyValueFlags::empty(),
            next_index: 0,
            sourced: true,
            items: Vec::new(),
        }
    }

    /// Add a flag applied to every entry this builder creates.
    pub fn flag(&mut self, flag: KeyValueFlags) -> &mut KeyValuesBuilder {
        self.flags |= flag;
        self
    }

    /// Append a key-value pair.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut KeyValuesBuilder {
        let kv = self.entry(key, value);
        self.items.push(kv);
        self
    }

    /// Construct a single entry with this builder's source and flags
    /// without appending it.
    pub fn entry(&mut self, key: impl Into<String>, value: impl Into<String>) -> KeyValue {
        let key = key.into();
        let source = if self.sourced {
            self.next_index += 1;
            Source {
                uri: self.uri.clone(),
                reference: self.reference.clone().map(Box::new),
                index: self.next_index,
            }
        } else {
            Source::empty()
        };
        KeyValue::new(
            key.clone(),
            value,
            Meta {
                original_key: key,
                source,
                flags: self.flags,
            },
        )
    }

    /// Build the collection.
    pub fn build(self) -> KeyValues {
        KeyValues { items: self.items }
    }
}

impl Default for KeyValuesBuilder {
    fn default() -> Self {
        KeyValuesBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariablesBuilder;

    fn kvs(pairs: &[(&str, &str)]) -> KeyValues {
        let mut b = KeyValues::builder();
        for (k, v) in pairs {
            b.add(*k, *v);
        }
        b.build()
    }

    #[test]
    fn test_to_map_last_wins_first_position() {
        let kvs = kvs(&[("a", "1"), ("b", "2"), ("a", "3")]);
        let map = kvs.to_map();
        assert_eq!(map.get("a").map(String::as_str), Some("3"));
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_expand_uses_batch_raw_view() {
        let kvs = kvs(&[("greeting", "Hi ${name}"), ("name", "Kenny")]);
        let vars = VariablesBuilder::new().build();
        let expanded = kvs.expand(&vars).unwrap();
        assert_eq!(expanded.iter().next().unwrap().expanded(), "Hi Kenny");
        // raw untouched
        assert_eq!(expanded.iter().next().unwrap().raw(), "Hi ${name}");
    }

    #[test]
    fn test_expand_prefers_resolved_over_later_duplicate() {
        let kvs = kvs(&[("a", "1"), ("b", "${a}"), ("a", "2")]);
        let vars = VariablesBuilder::new().build();
        let expanded = kvs.expand(&vars).unwrap();
        let b = expanded.iter().find(|kv| kv.key() == "b").unwrap();
        assert_eq!(b.expanded(), "1");
    }

    #[test]
    fn test_expand_idempotent() {
        let kvs = kvs(&[("x", "${a}"), ("y", "plain")]);
        let vars = VariablesBuilder::new().entry("a", "1").build();
        let once = kvs.expand(&vars).unwrap();
        let twice = once.expand(&vars).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_no_interpolation_fidelity() {
        let mut b = KeyValues::builder();
        b.flag(KeyValueFlags::NO_INTERPOLATION);
        b.add("a", "${nope}");
        let kvs = b.build();
        let vars = VariablesBuilder::new().entry("nope", "resolved").build();
        let expanded = kvs.expand(&vars).unwrap();
        assert_eq!(expanded.iter().next().unwrap().expanded(), "${nope}");
    }

    #[test]
    fn test_sensitive_skipped_globally_expanded_locally() {
        let mut b = KeyValues::builder();
        b.flag(KeyValueFlags::SENSITIVE);
        b.add("secret", "${host}:${port}");
        let kvs = b.build();
        let vars = VariablesBuilder::new()
            .entry("host", "h")
            .entry("port", "1")
            .build();

        let global = kvs.expand(&vars).unwrap();
        assert_eq!(global.iter().next().unwrap().expanded(), "${host}:${port}");

        let local = kvs.expand_with(&vars, true, true).unwrap();
        assert_eq!(local.iter().next().unwrap().expanded(), "h:1");
    }

    #[test]
    fn test_redact_display() {
        let mut b = KeyValues::builder();
        b.flag(KeyValueFlags::SENSITIVE);
        b.add("token", "abc123");
        let shown = b.build().to_string();
        assert_eq!(shown, "KeyValues[\ntoken=REDACTED\n]");
    }

    #[test]
    fn test_builder_indexes_are_one_based() {
        let mut b = KeyValuesBuilder::with_source(Uri::parse("mem:/x"), None);
        b.add("a", "1").add("b", "2");
        let kvs = b.build();
        let indexes: Vec<_> = kvs.iter().map(|kv| kv.meta().source.index).collect();
        assert_eq!(indexes, vec![1, 2]);
    }

    #[test]
    fn test_memoize_idempotent() {
        let kvs = kvs(&[("a", "1")]);
        assert_eq!(kvs.memoize(), kvs);
    }

    #[test]
    fn test_last() {
        let kvs = kvs(&[("a", "1"), ("a", "2")]);
        assert_eq!(kvs.last().unwrap().raw(), "2");
        assert!(KeyValues::empty().last().is_none());
    }
}
