/*
 * source_loader.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The source-loader scheduler: the chain-loading core.
//!
//! The scheduler owns a LIFO stack of pending sources. One iteration pops
//! a source, normalizes and dispatches it, tags the produced key-values
//! with the resource's flags, interpolates them locally, extracts child
//! resource declarations (pushed so the first declared loads next, giving
//! depth-first left-to-right order), applies the filter chain, strips the
//! DSL keys, and routes the remainder into the accumulator or the
//! variables store. After every resource the whole accumulator is
//! re-interpolated so later resources see earlier keys as variables.
//!
//! Interpolation during the walk is lenient (unresolved references stay
//! in place, since a later resource may supply them); the single
//! expansion after the stack drains is strict.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::kv::KeyValue;
use crate::kvs::KeyValues;
use crate::loader::LoaderContext;
use crate::resource::{LoadFlags, Resource};
use crate::resource_parser;
use crate::system::KeyValuesSystem;
use crate::uri::Uri;
use crate::variables::Variables;

/// A literal, named batch of key-values used as a root source.
#[derive(Debug, Clone)]
pub(crate) struct NamedKeyValues {
    pub(crate) name: String,
    pub(crate) key_values: KeyValues,
}

/// A root or discovered source: a resource declaration or an inline
/// literal batch.
#[derive(Debug, Clone)]
pub(crate) enum KeyValuesSource {
    Resource(Resource),
    Named(NamedKeyValues),
}

impl KeyValuesSource {
    fn name(&self) -> &str {
        match self {
            KeyValuesSource::Resource(r) => r.name(),
            KeyValuesSource::Named(n) => &n.name,
        }
    }
}

/// Reject sibling sources that share a name.
fn validate_names<'a>(sources: impl Iterator<Item = &'a KeyValuesSource>) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for source in sources {
        if !seen.insert(source.name()) {
            return Err(Error::ResourceNameDuplicate(source.name().to_string()));
        }
    }
    Ok(())
}

/// Run one load over the given root sources.
pub(crate) fn load(
    system: &KeyValuesSystem,
    root_variables: &dyn Variables,
    sources: Vec<KeyValuesSource>,
) -> Result<KeyValues> {
    let mut loader = SourceLoader {
        system,
        root_variables,
        variable_store: IndexMap::new(),
        keys: HashSet::new(),
        accumulator: Vec::new(),
        stack: VecDeque::new(),
    };
    match loader.run(sources) {
        Ok(kvs) => Ok(kvs),
        Err(e) => {
            system.environment().logger().fatal(&e);
            Err(e)
        }
    }
}

/// Variables visible during a load: the store first, then the caller's
/// chain.
struct LoadVariables<'a> {
    store: &'a IndexMap<String, String>,
    root: &'a dyn Variables,
}

impl Variables for LoadVariables<'_> {
    fn get_value(&self, key: &str) -> Option<String> {
        self.store
            .get(key)
            .cloned()
            .or_else(|| self.root.get_value(key))
    }
}

struct SourceLoader<'s> {
    system: &'s KeyValuesSystem,
    root_variables: &'s dyn Variables,
    variable_store: IndexMap<String, String>,
    keys: HashSet<String>,
    accumulator: Vec<KeyValue>,
    stack: VecDeque<KeyValuesSource>,
}

impl SourceLoader<'_> {
    fn run(&mut self, sources: Vec<KeyValuesSource>) -> Result<KeyValues> {
        if sources.is_empty() {
            return Ok(KeyValues::empty());
        }
        validate_names(sources.iter())?;
        self.stack.extend(sources);

        while let Some(source) = self.stack.pop_front() {
            match source {
                KeyValuesSource::Resource(resource) => self.load_resource(resource)?,
                KeyValuesSource::Named(named) => self.load_named(named)?,
            }
        }

        // The walk is done; expand once more, strictly. Sensitive entries
        // pass through untouched.
        let result = KeyValues::from_entries(std::mem::take(&mut self.accumulator));
        let vars = LoadVariables {
            store: &self.variable_store,
            root: self.root_variables,
        };
        Ok(result.expand_with(&vars, false, true)?.memoize())
    }

    fn load_resource(&mut self, resource: Resource) -> Result<()> {
        let described = resource.describe_chain();
        let resource = resource_parser::normalize(resource).map_err(|e| {
            e.with_context(&format!(
                "Resource has invalid resource key in URI. resource: {described}."
            ))
        })?;
        let flags = resource.flags();
        let logger = self.system.environment().logger();
        logger.load(&resource);

        let kvs = match self.dispatch(&resource) {
            Ok(kvs) => {
                logger.loaded(&resource);
                kvs
            }
            Err(e) if e.is_not_found() => {
                logger.missing(&resource, &e);
                if !flags.contains(LoadFlags::NO_REQUIRE) {
                    return Err(Error::ResourceNotFound(format!(
                        "Resource not found. resource: {}",
                        resource.describe_chain()
                    )));
                }
                KeyValues::empty()
            }
            Err(e) => {
                return Err(e.with_context(&format!(
                    "Resource load failed. resource: {}.",
                    resource.describe_chain()
                )))
            }
        };
        self.process(Some(&resource), kvs)
    }

    fn load_named(&mut self, named: NamedKeyValues) -> Result<()> {
        let uri = Uri::parse(&format!("null:///{}", named.name));
        let null_uri = crate::kv::Source::null_uri();
        let kvs = named.key_values.map(|kv| {
            if kv.meta().source.uri == null_uri {
                kv.with_source_uri(uri.clone())
            } else {
                kv.clone()
            }
        });
        self.process(None, kvs)
    }

    /// Steps 2-8 of the per-resource pipeline, shared by resources and
    /// inline sources.
    fn process(&mut self, resource: Option<&Resource>, mut kvs: KeyValues) -> Result<()> {
        let flags = resource.map(Resource::flags).unwrap_or_default();

        // Tag entries with the flags the resource imposes.
        let kv_flags = flags.key_value_flags();
        if !kv_flags.is_empty() {
            kvs = kvs.map(|kv| kv.with_added_flags(kv_flags));
        }

        // Local interpolation: the resource's own keys plus the chain.
        // Sensitive values may be referenced here.
        if !flags.contains(LoadFlags::NO_INTERPOLATE) {
            let vars = LoadVariables {
                store: &self.variable_store,
                root: self.root_variables,
            };
            kvs = kvs.expand_with(&vars, true, false)?;
        }

        // Discover children before filters can touch the DSL keys.
        if flags.contains(LoadFlags::NO_LOAD_CHILDREN) {
            if resource_parser::has_load_keys(&kvs) {
                let described = resource
                    .map(Resource::describe_chain)
                    .unwrap_or_default();
                self.system.environment().logger().warn(&format!(
                    "Resource is not allowed to load children but had load keys (ignoring). resource: {described}"
                ));
            }
        } else {
            let children = resource_parser::parse_resources(&kvs, resource).map_err(|e| {
                let described = resource
                    .map(Resource::describe_chain)
                    .unwrap_or_else(|| "inline".to_string());
                e.with_context(&format!(
                    "Resource has an invalid resource key. resource: {described}."
                ))
            })?;
            // Push first-declared on top for depth-first, left-to-right.
            for child in children.into_iter().rev() {
                self.stack.push_front(KeyValuesSource::Resource(child));
            }
        }

        if let Some(resource) = resource {
            kvs = self.apply_filters(resource, kvs)?;
        }

        kvs = resource_parser::strip_resource_keys(&kvs);

        if flags.contains(LoadFlags::NO_ADD) {
            // Variables only; nothing reaches the result.
            for (k, v) in kvs.to_map() {
                self.variable_store.insert(k, v);
            }
        } else {
            let mut added = false;
            for kv in &kvs {
                if flags.contains(LoadFlags::NO_REPLACE) && self.keys.contains(kv.key()) {
                    continue;
                }
                self.keys.insert(kv.key().to_string());
                self.accumulator.push(kv.clone());
                added = true;
            }
            if !added && flags.contains(LoadFlags::NO_EMPTY) {
                let described = resource
                    .map(Resource::describe_chain)
                    .unwrap_or_default();
                return Err(Error::Empty(format!(
                    "Resource did not have any key values and was flagged not empty. resource: {described}"
                )));
            }
        }

        // Re-interpolate everything loaded so far so the next resource
        // sees the current keys as variables.
        let accumulated = KeyValues::from_entries(std::mem::take(&mut self.accumulator));
        let expanded = {
            let vars = LoadVariables {
                store: &self.variable_store,
                root: self.root_variables,
            };
            accumulated.expand_with(&vars, false, false)?
        };
        for (k, v) in expanded.to_map() {
            self.variable_store.insert(k, v);
        }
        self.accumulator = expanded.into_iter().collect();
        Ok(())
    }

    fn dispatch(&self, resource: &Resource) -> Result<KeyValues> {
        let vars = LoadVariables {
            store: &self.variable_store,
            root: self.root_variables,
        };
        let context = LoaderContext {
            environment: self.system.environment(),
            media: self.system.media(),
            variables: &vars,
            providers: self.system.providers(),
        };
        for finder in self.system.loader_finders() {
            if let Some(result) = finder.load(&context, resource) {
                return result;
            }
        }
        Err(Error::LoaderNotFound(format!(
            "Resource Loader not found. resource: {}",
            resource.describe_chain()
        )))
    }

    fn apply_filters(&self, resource: &Resource, mut kvs: KeyValues) -> Result<KeyValues> {
        let pre = self.system.pre_filters();
        let post = self.system.post_filters();
        if pre.is_empty() && post.is_empty() && resource.filters().is_empty() {
            return Ok(kvs);
        }

        let skip_resource_keys = resource.flags().contains(LoadFlags::NO_FILTER_RESOURCE_KEYS);
        let ignore = move |kv: &KeyValue| skip_resource_keys && resource_parser::is_resource_key(kv);
        let context = crate::filter::FilterContext {
            environment: self.system.environment(),
            parameters: resource.parameters(),
            ignore: &ignore,
        };

        for filter in pre.iter().chain(resource.filters()).chain(post.iter()) {
            let applied = self
                .system
                .filter()
                .apply(&context, &kvs, filter)
                .map_err(|e| {
                    e.with_context(&format!(
                        "Resource has bad filter expression. filter: {filter} resource: {}.",
                        resource.describe_chain()
                    ))
                })?;
            // An id no filter recognizes is a no-op.
            if let Some(next) = applied {
                kvs = next;
            }
        }
        Ok(kvs)
    }
}
