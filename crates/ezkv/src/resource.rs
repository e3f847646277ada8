/*
 * resource.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Resource declarations.
//!
//! A [`Resource`] names a URI-addressable source of key-values plus the
//! metadata controlling how it loads: a symbolic name, load flags, a
//! media-type hint, named parameters, and a filter chain. Resources are
//! immutable once built; the resource-key parser produces a *normalized*
//! copy with URI-query metadata merged in before a resource is loaded.

use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::kv::{KeyValue, KeyValueFlags};
use crate::uri::Uri;

bitflags::bitflags! {
    /// Flags controlling how a resource loads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct LoadFlags: u16 {
        /// A missing resource yields an empty stream instead of an error.
        const NO_REQUIRE = 1 << 0;
        /// The resource must contribute at least one key-value.
        const NO_EMPTY = 1 << 1;
        /// Keys already present in the result are not replaced.
        const NO_REPLACE = 1 << 2;
        /// Contribute to variables only, not to the result.
        const NO_ADD = 1 << 3;
        /// Ignore `_load_` keys in the resource body (with a warning).
        const NO_LOAD_CHILDREN = 1 << 4;
        /// Mark every produced key-value as never-interpolated.
        const NO_INTERPOLATE = 1 << 5;
        /// Mark every produced key-value as sensitive.
        const SENSITIVE = 1 << 6;
        /// Filters skip resource DSL keys.
        const NO_FILTER_RESOURCE_KEYS = 1 << 7;
        /// Child resources inherit this resource's flag set.
        const PROPAGATE = 1 << 8;
    }
}

const FLAG_NAMES: &[(LoadFlags, &str)] = &[
    (LoadFlags::NO_REQUIRE, "NO_REQUIRE"),
    (LoadFlags::NO_EMPTY, "NO_EMPTY"),
    (LoadFlags::NO_REPLACE, "NO_REPLACE"),
    (LoadFlags::NO_ADD, "NO_ADD"),
    (LoadFlags::NO_LOAD_CHILDREN, "NO_LOAD_CHILDREN"),
    (LoadFlags::NO_INTERPOLATE, "NO_INTERPOLATE"),
    (LoadFlags::SENSITIVE, "SENSITIVE"),
    (LoadFlags::NO_FILTER_RESOURCE_KEYS, "NO_FILTER_RESOURCE_KEYS"),
    (LoadFlags::PROPAGATE, "PROPAGATE"),
];

impl LoadFlags {
    /// Parse one case-insensitive flag name.
    pub fn parse_flag(name: &str) -> Result<LoadFlags> {
        let upper = name.trim().to_ascii_uppercase();
        let flag = match upper.as_str() {
            "NO_REQUIRE" | "OPTIONAL" | "NOT_REQUIRED" => LoadFlags::NO_REQUIRE,
            "NO_EMPTY" => LoadFlags::NO_EMPTY,
            "NO_REPLACE" => LoadFlags::NO_REPLACE,
            "NO_ADD" => LoadFlags::NO_ADD,
            "NO_LOAD_CHILDREN" => LoadFlags::NO_LOAD_CHILDREN,
            "NO_INTERPOLATE" => LoadFlags::NO_INTERPOLATE,
            "SENSITIVE" => LoadFlags::SENSITIVE,
            "NO_FILTER_RESOURCE_KEYS" => LoadFlags::NO_FILTER_RESOURCE_KEYS,
            "PROPAGATE" => LoadFlags::PROPAGATE,
            // Declared upstream but without settled semantics yet.
            "LOCK" => {
                return Err(Error::ResourceKeyInvalid(format!(
                    "Load flag '{name}' is reserved and not yet supported."
                )))
            }
            _ => {
                return Err(Error::ResourceKeyInvalid(format!(
                    "Unknown load flag: '{name}'"
                )))
            }
        };
        Ok(flag)
    }

    /// Parse a CSV of flag names.
    pub fn parse_csv(csv: &str) -> Result<LoadFlags> {
        let mut flags = LoadFlags::empty();
        for part in csv.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            flags |= LoadFlags::parse_flag(part)?;
        }
        Ok(flags)
    }

    /// The set's flag names in declaration order.
    pub fn names(&self) -> Vec<&'static str> {
        FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// CSV rendering, e.g. `NO_ADD,NO_INTERPOLATE`.
    pub fn to_csv(&self) -> String {
        self.names().join(",")
    }

    /// Bracketed rendering for log lines, e.g. `[NO_ADD, NO_INTERPOLATE]`.
    pub fn bracketed(&self) -> String {
        format!("[{}]", self.names().join(", "))
    }

    /// The per-entry flags this load-flag set implies.
    pub(crate) fn key_value_flags(&self) -> KeyValueFlags {
        let mut flags = KeyValueFlags::empty();
        if self.contains(LoadFlags::NO_INTERPOLATE) {
            flags |= KeyValueFlags::NO_INTERPOLATION;
        }
        if self.contains(LoadFlags::SENSITIVE) {
            flags |= KeyValueFlags::SENSITIVE;
        }
        flags
    }
}

/// A single filter invocation on a resource's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Filter identifier, possibly carrying a target suffix
    /// (`sed`, `grep_key`, `sed_val`, ...).
    pub id: String,
    /// Free-form expression interpreted by the filter.
    pub expression: String,
    /// Differentiates multiple invocations of the same filter; usually
    /// the declaring resource name, empty for implicit filters.
    pub label: String,
}

impl Filter {
    /// Create a filter invocation with an empty label.
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Filter {
        Filter {
            id: id.into(),
            expression: expression.into(),
            label: String::new(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter[id={}, expression={}]", self.id, self.expression)
    }
}

/// Validate a symbolic resource name (`[a-zA-Z0-9]+`).
pub fn validate_name(name: &str) -> Result<&str> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(name)
    } else {
        Err(Error::ResourceKeyInvalid(format!(
            "Invalid resource name. Must be alphanumeric: '{name}'"
        )))
    }
}

/// A declaration of a URI-addressable key-value source.
#[derive(Debug, Clone)]
pub struct Resource {
    uri: Uri,
    name: String,
    flags: LoadFlags,
    media_type: Option<String>,
    parameters: IndexMap<String, String>,
    filters: Vec<Filter>,
    reference: Option<Box<KeyValue>>,
    normalized: bool,
}

impl Resource {
    /// Start building a resource for the given URI.
    pub fn builder(uri: impl AsRef<str>) -> ResourceBuilder {
        ResourceBuilder::new(Uri::parse(uri.as_ref()))
    }

    /// The resource URI. A URI without a scheme loads as a file.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The symbolic name, used in meta-key names and duplicate detection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The load flags.
    pub fn flags(&self) -> LoadFlags {
        self.flags
    }

    /// The explicit media-type hint, overriding extension sniffing.
    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    /// Named parameters, in declaration order.
    pub fn parameters(&self) -> &IndexMap<String, String> {
        &self.parameters
    }

    /// The filter chain, in application order.
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// The key-value that declared this resource; `None` for roots.
    pub fn reference(&self) -> Option<&KeyValue> {
        self.reference.as_deref()
    }

    /// Whether URI-query metadata has been merged in.
    pub fn normalized(&self) -> bool {
        self.normalized
    }

    /// A builder primed with this resource's configuration. Used by the
    /// fan-out loaders to synthesize children that inherit it.
    pub fn to_builder(&self) -> ResourceBuilder {
        ResourceBuilder {
            uri: self.uri.clone(),
            name: self.name.clone(),
            flags: self.flags,
            media_type: self.media_type.clone(),
            parameters: self.parameters.clone(),
            filters: self.filters.clone(),
            reference: self.reference.clone(),
            normalized: self.normalized,
        }
    }

    /// One-line description: URI, flags, and optionally the declaring key.
    pub(crate) fn describe(&self, include_reference: bool) -> String {
        let mut out = format!("uri='{}'", self.uri);
        if !self.flags.is_empty() {
            out.push_str(&format!(" flags={}", self.flags.bracketed()));
        }
        if include_reference {
            if let Some(reference) = &self.reference {
                out.push_str(&format!(
                    " specified with key: '{}' in uri='{}'",
                    reference.key(),
                    reference.meta().source.uri
                ));
            }
        }
        out
    }

    /// Description plus the full declaring chain up to the root, one
    /// `<-- specified with key ...` line per ancestor.
    pub(crate) fn describe_chain(&self) -> String {
        let mut out = self.describe(false);
        let mut reference = self.reference.as_deref();
        while let Some(kv) = reference {
            out.push_str(&format!(
                "\n\t<-- specified with key: '{}' in uri='{}'",
                kv.key(),
                kv.meta().source.uri
            ));
            reference = kv.meta().source.reference.as_deref();
        }
        out
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(false))
    }
}

/// Builder for [`Resource`].
#[derive(Debug, Clone)]
pub struct ResourceBuilder {
    uri: Uri,
    name: String,
    flags: LoadFlags,
    media_type: Option<String>,
    parameters: IndexMap<String, String>,
    filters: Vec<Filter>,
    reference: Option<Box<KeyValue>>,
    normalized: bool,
}

impl ResourceBuilder {
    /// Start a builder for the given URI with the default name `root`.
    pub fn new(uri: Uri) -> ResourceBuilder {
        ResourceBuilder {
            uri,
            name: "root".to_string(),
            flags: LoadFlags::empty(),
            media_type: None,
            parameters: IndexMap::new(),
            filters: Vec::new(),
            reference: None,
            normalized: false,
        }
    }

    /// Replace the URI.
    pub fn uri(mut self, uri: Uri) -> ResourceBuilder {
        self.uri = uri;
        self
    }

    /// Set the symbolic name (validated at `build`).
    pub fn name(mut self, name: impl Into<String>) -> ResourceBuilder {
        self.name = name.into();
        self
    }

    /// Add load flags.
    pub fn flag(mut self, flags: LoadFlags) -> ResourceBuilder {
        self.flags |= flags;
        self
    }

    /// Replace the load flags.
    pub fn flags(mut self, flags: LoadFlags) -> ResourceBuilder {
        self.flags = flags;
        self
    }

    /// Set the explicit media type.
    pub fn media_type(mut self, media_type: impl Into<String>) -> ResourceBuilder {
        self.media_type = Some(media_type.into());
        self
    }

    /// Set a named parameter. Later sets override earlier ones.
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> ResourceBuilder {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Append a filter.
    pub fn filter(mut self, filter: Filter) -> ResourceBuilder {
        self.filters.push(filter);
        self
    }

    /// Set the declaring key-value.
    pub(crate) fn reference(mut self, reference: KeyValue) -> ResourceBuilder {
        self.reference = Some(Box::new(reference));
        self
    }

    /// Mark the resource as normalized.
    pub(crate) fn normalized(mut self, normalized: bool) -> ResourceBuilder {
        self.normalized = normalized;
        self
    }

    /// Build, validating the name.
    pub fn build(self) -> Result<Resource> {
        validate_name(&self.name)?;
        Ok(Resource {
            uri: self.uri,
            name: self.name,
            flags: self.flags,
            media_type: self.media_type,
            parameters: self.parameters,
            filters: self.filters,
            reference: self.reference,
            normalized: self.normalized,
        })
    }
}
