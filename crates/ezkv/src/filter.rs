/*
 * filter.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Per-resource filters over a loaded key-value stream.
//!
//! A filter invocation pairs a string id with a free-form expression. The
//! id may carry a target suffix selecting what the filter operates on:
//! `_key` (the default), or `_val`/`_value`. Registered filters are tried
//! in order; a filter that does not recognize the id returns `None` so
//! successors can try, and an id nobody recognizes is a no-op.
//!
//! Built-ins: `grep` (retain by regex), `sed` (substitute/delete), and
//! `join` (merge duplicate keys; always targets values).

use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::kv::KeyValue;
use crate::kvs::KeyValues;
use crate::resource::Filter;
use crate::sed;
use crate::system::BUILTIN_ORDER_START;

/// Context handed to filters.
pub struct FilterContext<'a> {
    /// The environment of the running system.
    pub environment: &'a dyn Environment,
    /// The resource's named parameters.
    pub parameters: &'a IndexMap<String, String>,
    /// Entries for which this returns true bypass filtering entirely.
    /// Set from `NO_FILTER_RESOURCE_KEYS` to protect resource DSL keys.
    pub ignore: &'a dyn Fn(&KeyValue) -> bool,
}

/// A filter implementation, dispatched by filter id.
pub trait KeyValuesFilter: Send + Sync {
    /// Registration order; lower binds first.
    fn order(&self) -> i32 {
        0
    }

    /// Apply the filter if `filter.id` addresses this implementation.
    /// `None` means "not mine, let the next filter try".
    fn apply(
        &self,
        context: &FilterContext<'_>,
        kvs: &KeyValues,
        filter: &Filter,
    ) -> Result<Option<KeyValues>>;
}

/// What part of the entry a filter operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Key,
    Value,
    Default,
}

/// Split a target suffix off the filter id, case-insensitively.
fn split_target(id: &str) -> (&str, Target) {
    let lower = id.to_ascii_lowercase();
    if let Some(base) = lower.strip_suffix("_key") {
        (&id[..base.len()], Target::Key)
    } else if let Some(base) = lower.strip_suffix("_value") {
        (&id[..base.len()], Target::Value)
    } else if let Some(base) = lower.strip_suffix("_val") {
        (&id[..base.len()], Target::Value)
    } else {
        (id, Target::Default)
    }
}

/// Check whether `filter.id` addresses the filter named `name`, resolving
/// the target suffix. An id that starts with `name_` but carries an
/// unrecognized suffix is an error rather than a silent no-op.
fn match_id(filter: &Filter, name: &str) -> Result<Option<Target>> {
    let (base, target) = split_target(&filter.id);
    if base.eq_ignore_ascii_case(name) {
        return Ok(Some(target));
    }
    let lower = filter.id.to_ascii_lowercase();
    if lower.starts_with(&format!("{name}_")) {
        return Err(Error::BadFilterExpression(format!(
            "Unknown target suffix on filter id '{}'",
            filter.id
        )));
    }
    Ok(None)
}

fn target_text<'a>(kv: &'a KeyValue, target: Target) -> &'a str {
    match target {
        Target::Key | Target::Default => kv.key(),
        Target::Value => kv.value(),
    }
}

/// Retains entries whose target matches a regular expression.
#[derive(Debug, Default)]
pub struct GrepFilter;

impl KeyValuesFilter for GrepFilter {
    fn order(&self) -> i32 {
        BUILTIN_ORDER_START
    }

    fn apply(
        &self,
        context: &FilterContext<'_>,
        kvs: &KeyValues,
        filter: &Filter,
    ) -> Result<Option<KeyValues>> {
        let Some(target) = match_id(filter, "grep")? else {
            return Ok(None);
        };
        let pattern = Regex::new(&filter.expression).map_err(|e| {
            Error::BadFilterExpression(format!(
                "Invalid grep expression '{}': {e}",
                filter.expression
            ))
        })?;
        let ignore = context.ignore;
        Ok(Some(kvs.filter(|kv| {
            ignore(kv) || pattern.is_match(target_text(kv, target))
        })))
    }
}

/// Rewrites or drops entries with a sed command.
#[derive(Debug, Default)]
pub struct SedFilter;

impl KeyValuesFilter for SedFilter {
    fn order(&self) -> i32 {
        BUILTIN_ORDER_START + 1
    }

    fn apply(
        &self,
        context: &FilterContext<'_>,
        kvs: &KeyValues,
        filter: &Filter,
    ) -> Result<Option<KeyValues>> {
        let Some(target) = match_id(filter, "sed")? else {
            return Ok(None);
        };
        let command = sed::parse(&filter.expression)?;
        let ignore = context.ignore;
        Ok(Some(kvs.flat_map(|kv| {
            if ignore(kv) {
                return KeyValues::of(kv.clone());
            }
            match target {
                Target::Key | Target::Default => match command.execute(kv.key()) {
                    None => KeyValues::empty(),
                    Some(key) => KeyValues::of(kv.with_key(key)),
                },
                Target::Value => match command.execute(kv.value()) {
                    None => KeyValues::empty(),
                    Some(value) if value == kv.value() => KeyValues::of(kv.clone()),
                    // Seal so re-interpolation does not undo the rewrite.
                    Some(value) => KeyValues::of(kv.with_sealed_value(value)),
                },
            }
        })))
    }
}

/// Joins the values of duplicate keys with a separator. The group keeps
/// the position of the key's first occurrence. Always targets values.
#[derive(Debug, Default)]
pub struct JoinFilter;

impl KeyValuesFilter for JoinFilter {
    fn order(&self) -> i32 {
        BUILTIN_ORDER_START + 2
    }

    fn apply(
        &self,
        _context: &FilterContext<'_>,
        kvs: &KeyValues,
        filter: &Filter,
    ) -> Result<Option<KeyValues>> {
        if match_id(filter, "join")?.is_none() {
            return Ok(None);
        }
        let separator = &filter.expression;
        let mut grouped: IndexMap<String, KeyValue> = IndexMap::new();
        for kv in kvs {
            match grouped.get(kv.key()) {
                Some(found) => {
                    let joined = format!("{}{separator}{}", found.expanded(), kv.expanded());
                    grouped.insert(kv.key().to_string(), kv.with_expanded(joined));
                }
                None => {
                    grouped.insert(kv.key().to_string(), kv.clone());
                }
            }
        }
        Ok(Some(KeyValues::from_entries(
            grouped.into_values().collect(),
        )))
    }
}

/// Tries registered filters in order; the result of the last filter that
/// recognized the id wins. `None` when nobody recognized it.
pub(crate) struct CompositeFilter {
    filters: Vec<Arc<dyn KeyValuesFilter>>,
}

impl CompositeFilter {
    pub(crate) fn new(filters: Vec<Arc<dyn KeyValuesFilter>>) -> CompositeFilter {
        CompositeFilter { filters }
    }

    pub(crate) fn apply(
        &self,
        context: &FilterContext<'_>,
        kvs: &KeyValues,
        filter: &Filter,
    ) -> Result<Option<KeyValues>> {
        let mut current: Option<KeyValues> = None;
        for f in &self.filters {
            let input = current.as_ref().unwrap_or(kvs);
            if let Some(next) = f.apply(context, input, filter)? {
                current = Some(next);
            }
        }
        Ok(current)
    }
}
