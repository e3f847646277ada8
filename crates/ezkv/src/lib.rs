/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! # ezkv
//!
//! Bootstrapping configuration: recursive, ordered key-value loading.
//!
//! Ezkv loads an ordered stream of string key/value pairs from layered
//! resources (files, classpath-like resources, environment variables,
//! system properties, command-line args, stdin, and programmatic
//! providers). Loaded key/values may themselves declare additional
//! resources with `_load_` keys, producing a recursive, depth-first
//! expansion. The output is a flat, ordered list of (key, value,
//! provenance) triples that can seed any higher-level configuration
//! framework.
//!
//! ## Example
//!
//! ```no_run
//! use ezkv::KeyValuesSystem;
//!
//! # fn main() -> ezkv::Result<()> {
//! let kvs = KeyValuesSystem::defaults()
//!     .loader()
//!     .add("file:/etc/myapp/app.properties?_flags=optional")
//!     .add("env:///?_filter_grep_key=^MYAPP_&_filter_sed_key=s/^MYAPP_/myapp./")
//!     .load()?;
//!
//! for (key, value) in kvs.to_map() {
//!     println!("{key}={value}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Chain loading
//!
//! A loaded resource can declare further resources in its body:
//!
//! ```properties
//! _load_child=classpath:/child.properties
//! _flags_child=optional
//! message=Hello ${user.name}
//! ```
//!
//! Children load depth-first in declaration order, and after every
//! resource the accumulated result is re-interpolated so later resources
//! can reference earlier keys with bash-style `${...}` expressions.
//!
//! ## Extension points
//!
//! - [`KeyValuesMedia`] / [`MediaFinder`]: document formats
//! - [`KeyValuesLoaderFinder`]: URI scheme handlers
//! - [`KeyValuesFilter`]: per-resource stream filters
//! - [`KeyValuesProvider`]: programmatic reference config
//! - [`Environment`]: everything system-level, replaceable for tests

mod environment;
mod error;
mod filter;
mod interpolate;
mod kv;
mod kvs;
mod loader;
mod media;
pub mod properties;
mod resource;
mod resource_parser;
mod sed;
mod source_loader;
mod system;
mod uri;
mod variables;

pub use environment::{
    DefaultEnvironment, DirectoryResourceLoader, EmptyResourceLoader, Environment, Logger,
    MapResourceLoader, NoOpLogger, RecordingLogger, ResourceLoader, TracingLogger,
};
pub use error::{Error, Result};
pub use filter::{FilterContext, GrepFilter, JoinFilter, KeyValuesFilter, SedFilter};
pub use interpolate::{Interpolator, MAX_DEPTH};
pub use kv::{KeyValue, KeyValueFlags, Meta, Source, REDACTED_MESSAGE};
pub use kvs::{KeyValues, KeyValuesBuilder};
pub use loader::{KeyValuesLoaderFinder, KeyValuesProvider, LoaderContext};
pub use media::{
    BuiltinMediaFinder, KeyValuesMedia, MediaFinder, PropertiesMedia, UrlEncodedMedia,
    MEDIA_TYPE_PROPERTIES, MEDIA_TYPE_URLENCODED,
};
pub use resource::{validate_name, Filter, LoadFlags, Resource, ResourceBuilder};
pub use system::{
    KeyValuesSystem, KeyValuesSystemBuilder, Loader, LoaderBuilder, BUILTIN_ORDER_START,
};
pub use uri::Uri;
pub use variables::{
    of_system_env, of_system_properties, ChainedVariables, EmptyVariables, Variables,
    VariablesBuilder,
};
