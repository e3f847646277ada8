/*
 * system.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The system facade.
//!
//! A [`KeyValuesSystem`] binds the environment with the registries of
//! media finders, scheme handlers, filters, and providers. Registries are
//! immutable snapshots captured when the system is built, each sorted by
//! `order()` (lower binds first; built-ins start at
//! [`BUILTIN_ORDER_START`], user extensions default to 0). A built system
//! is reentrant: every `load()` owns its own mutable state.
//!
//! ```no_run
//! use ezkv::KeyValuesSystem;
//!
//! # fn main() -> ezkv::Result<()> {
//! let system = KeyValuesSystem::defaults();
//! let kvs = system
//!     .loader()
//!     .add("classpath:/start.properties")
//!     .add("system:///")
//!     .add("env:///")
//!     .load()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::environment::{DefaultEnvironment, Environment};
use crate::error::Result;
use crate::filter::{CompositeFilter, GrepFilter, JoinFilter, KeyValuesFilter, SedFilter};
use crate::kvs::KeyValues;
use crate::loader::{BuiltinLoader, KeyValuesLoaderFinder, KeyValuesProvider};
use crate::media::{BuiltinMediaFinder, CompositeMediaFinder, MediaFinder};
use crate::resource::{Filter, Resource};
use crate::source_loader::{self, KeyValuesSource, NamedKeyValues};
use crate::variables::{ChainedVariables, Variables, VariablesBuilder};

/// The order at which built-in components register. Low enough that every
/// built-in sorts before the user default of `0`; register lower to
/// override a built-in.
pub const BUILTIN_ORDER_START: i32 = -127;

/// The entry point: environment plus immutable registries.
pub struct KeyValuesSystem {
    environment: Arc<dyn Environment>,
    media: CompositeMediaFinder,
    loader_finders: Vec<Arc<dyn KeyValuesLoaderFinder>>,
    filter: CompositeFilter,
    providers: Vec<Arc<dyn KeyValuesProvider>>,
    pre_filters: Vec<Filter>,
    post_filters: Vec<Filter>,
}

impl KeyValuesSystem {
    /// A system with the default environment and built-in registries.
    pub fn defaults() -> KeyValuesSystem {
        KeyValuesSystem::builder().build()
    }

    /// Start building a customized system.
    pub fn builder() -> KeyValuesSystemBuilder {
        KeyValuesSystemBuilder::default()
    }

    /// The environment this system runs against.
    pub fn environment(&self) -> &dyn Environment {
        self.environment.as_ref()
    }

    /// Start building a loader for this system.
    pub fn loader(&self) -> LoaderBuilder<'_> {
        LoaderBuilder {
            system: self,
            specs: Vec::new(),
            variables: VariablesBuilder::new(),
            name_prefix: "root".to_string(),
            count: 0,
        }
    }

    /// Signal that this system will not be used to load anymore.
    pub fn close(&self) {
        self.environment.logger().closed();
    }

    pub(crate) fn media(&self) -> &CompositeMediaFinder {
        &self.media
    }

    pub(crate) fn loader_finders(&self) -> &[Arc<dyn KeyValuesLoaderFinder>] {
        &self.loader_finders
    }

    pub(crate) fn filter(&self) -> &CompositeFilter {
        &self.filter
    }

    pub(crate) fn providers(&self) -> &[Arc<dyn KeyValuesProvider>] {
        &self.providers
    }

    pub(crate) fn pre_filters(&self) -> &[Filter] {
        &self.pre_filters
    }

    pub(crate) fn post_filters(&self) -> &[Filter] {
        &self.post_filters
    }
}

/// Builder for [`KeyValuesSystem`].
#[derive(Default)]
pub struct KeyValuesSystemBuilder {
    environment: Option<Arc<dyn Environment>>,
    media_finders: Vec<Arc<dyn MediaFinder>>,
    loader_finders: Vec<Arc<dyn KeyValuesLoaderFinder>>,
    filters: Vec<Arc<dyn KeyValuesFilter>>,
    providers: Vec<Arc<dyn KeyValuesProvider>>,
    pre_filters: Vec<Filter>,
    post_filters: Vec<Filter>,
}

impl KeyValuesSystemBuilder {
    /// Replace the environment.
    pub fn environment(mut self, environment: impl Environment + 'static) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    /// Replace the environment with a shared instance.
    pub fn environment_arc(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Register a media finder.
    pub fn media_finder(mut self, finder: impl MediaFinder + 'static) -> Self {
        self.media_finders.push(Arc::new(finder));
        self
    }

    /// Register a loader finder (a scheme handler).
    pub fn loader_finder(mut self, finder: impl KeyValuesLoaderFinder + 'static) -> Self {
        self.loader_finders.push(Arc::new(finder));
        self
    }

    /// Register a filter.
    pub fn filter(mut self, filter: impl KeyValuesFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Register a provider, loadable through `provider:///`.
    pub fn provider(mut self, provider: impl KeyValuesProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Add an implicit filter applied to every resource *before* its
    /// explicit filter chain.
    pub fn add_pre_filter(
        mut self,
        id: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.pre_filters.push(Filter::new(id, expression));
        self
    }

    /// Add an implicit filter applied to every resource *after* its
    /// explicit filter chain.
    pub fn add_post_filter(
        mut self,
        id: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.post_filters.push(Filter::new(id, expression));
        self
    }

    /// Build the system. Registries are snapshotted and sorted by order;
    /// the sort is stable, so equal orders keep registration order.
    pub fn build(self) -> KeyValuesSystem {
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(DefaultEnvironment::new()));

        let mut media_finders: Vec<Arc<dyn MediaFinder>> =
            vec![Arc::new(BuiltinMediaFinder::default())];
        media_finders.extend(self.media_finders);
        media_finders.sort_by_key(|f| f.order());

        let mut loader_finders: Vec<Arc<dyn KeyValuesLoaderFinder>> = BuiltinLoader::all()
            .into_iter()
            .map(|l| Arc::new(l) as Arc<dyn KeyValuesLoaderFinder>)
            .collect();
        loader_finders.extend(self.loader_finders);
        loader_finders.sort_by_key(|f| f.order());

        let mut filters: Vec<Arc<dyn KeyValuesFilter>> =
            vec![Arc::new(GrepFilter), Arc::new(SedFilter), Arc::new(JoinFilter)];
        filters.extend(self.filters);
        filters.sort_by_key(|f| f.order());

        let mut providers = self.providers;
        providers.sort_by_key(|p| p.order());

        let system = KeyValuesSystem {
            environment,
            media: CompositeMediaFinder::new(media_finders),
            loader_finders,
            filter: CompositeFilter::new(filters),
            providers,
            pre_filters: self.pre_filters,
            post_filters: self.post_filters,
        };
        system.environment.logger().init();
        system
    }
}

enum SourceSpec {
    Uri { uri: String, name: String },
    Resource(Resource),
    Named { name: String, key_values: KeyValues },
}

/// Builds a [`Loader`] over an ordered list of sources and a variables
/// chain. The order of `add` calls is the declaration order of the root
/// resources; the order of `add_variables` calls is the variables
/// resolution order (earlier wins).
pub struct LoaderBuilder<'s> {
    system: &'s KeyValuesSystem,
    specs: Vec<SourceSpec>,
    variables: VariablesBuilder,
    name_prefix: String,
    count: usize,
}

impl<'s> LoaderBuilder<'s> {
    /// Add a resource by URI. The resource name is generated from the
    /// name prefix and a counter (`root0`, `root1`, ...).
    pub fn add(mut self, uri: impl AsRef<str>) -> Self {
        let name = format!("{}{}", self.name_prefix, self.count);
        self.count += 1;
        self.specs.push(SourceSpec::Uri {
            uri: uri.as_ref().to_string(),
            name,
        });
        self
    }

    /// Add a fully-configured resource.
    pub fn add_resource(mut self, resource: Resource) -> Self {
        self.count += 1;
        self.specs.push(SourceSpec::Resource(resource));
        self
    }

    /// Add an inline, named batch of key-values.
    pub fn add_named(mut self, name: impl Into<String>, key_values: KeyValues) -> Self {
        self.specs.push(SourceSpec::Named {
            name: name.into(),
            key_values,
        });
        self
    }

    /// Add a variables lookup to the interpolation chain.
    pub fn add_variables(mut self, variables: impl Variables + 'static) -> Self {
        self.variables = self.variables.add(variables);
        self
    }

    /// Set the prefix for generated resource names. Applies to
    /// subsequent `add` calls; validated when the loader runs.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Build a reusable loader.
    pub fn build(self) -> Loader<'s> {
        Loader {
            system: self.system,
            specs: self.specs,
            variables: self.variables.build(),
        }
    }

    /// Build and load in one call.
    pub fn load(self) -> Result<KeyValues> {
        self.build().load()
    }
}

/// A reusable loader: each `load` runs a fresh scheduler over the same
/// sources and variables.
pub struct Loader<'s> {
    system: &'s KeyValuesSystem,
    specs: Vec<SourceSpec>,
    variables: ChainedVariables,
}

impl Loader<'_> {
    /// Load key-values from the configured sources. With no sources the
    /// environment's default resource is loaded.
    pub fn load(&self) -> Result<KeyValues> {
        let mut sources = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let source = match spec {
                SourceSpec::Uri { uri, name } => KeyValuesSource::Resource(
                    Resource::builder(uri).name(name.clone()).build()?,
                ),
                SourceSpec::Resource(resource) => KeyValuesSource::Resource(resource.clone()),
                SourceSpec::Named { name, key_values } => {
                    KeyValuesSource::Named(NamedKeyValues {
                        name: name.clone(),
                        key_values: key_values.clone(),
                    })
                }
            };
            sources.push(source);
        }
        if sources.is_empty() {
            sources.push(KeyValuesSource::Resource(
                self.system.environment().default_resource(),
            ));
        }
        source_loader::load(self.system, &self.variables, sources)
    }
}
