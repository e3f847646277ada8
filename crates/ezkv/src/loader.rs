/*
 * loader.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Scheme handlers: given a normalized resource, produce its key-values.
//!
//! Each handler owns one URI scheme. The built-ins cover `classpath`,
//! `classpaths` (fan-out over every match), `file`, `system`, `env`,
//! `cmd`, `stdin`, `provider`, `profile.<scheme>` (fan-out over a profile
//! list), and a set of generic URL schemes delegated to the environment.
//!
//! The fan-out handlers do not load content themselves: they synthesize
//! child resource declarations as DSL key-values and let the scheduler
//! load each child, so every load is normalized, filtered, and logged the
//! same way.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::kvs::{KeyValues, KeyValuesBuilder};
use crate::media::{CompositeMediaFinder, KeyValuesMedia};
use crate::resource::{LoadFlags, Resource};
use crate::resource_parser;
use crate::system::BUILTIN_ORDER_START;
use crate::uri::Uri;
use crate::variables::Variables;

/// Marker substituted per profile in `profile.<scheme>` URIs.
const PROFILE_TOKEN: &str = "__PROFILE__";

/// Dependencies available to scheme handlers and providers.
pub struct LoaderContext<'a> {
    pub(crate) environment: &'a dyn Environment,
    pub(crate) media: &'a CompositeMediaFinder,
    pub(crate) variables: &'a dyn Variables,
    pub(crate) providers: &'a [Arc<dyn KeyValuesProvider>],
}

impl<'a> LoaderContext<'a> {
    /// The environment.
    pub fn environment(&self) -> &dyn Environment {
        self.environment
    }

    /// The variables currently visible to interpolation.
    pub fn variables(&self) -> &dyn Variables {
        self.variables
    }

    /// The parser for the resource's media, from the explicit media-type
    /// hint or URI sniffing.
    pub fn require_parser(&self, resource: &Resource) -> Result<Arc<dyn KeyValuesMedia>> {
        let found = match resource.media_type() {
            Some(media_type) => self.media.find_by_media_type(media_type),
            None => self.media.find_by_uri(resource.uri()),
        };
        found.ok_or_else(|| {
            Error::Media(format!(
                "Media type not found. resource: {}",
                resource.describe(false)
            ))
        })
    }
}

/// Contributes reference key-values programmatically, loaded through the
/// `provider:///` scheme.
pub trait KeyValuesProvider: Send + Sync {
    /// Registration order; lower binds first.
    fn order(&self) -> i32 {
        0
    }

    /// The provider's name (`[a-zA-Z0-9]+`), addressable as
    /// `provider:///<name>`.
    fn name(&self) -> &str;

    /// Add this provider's key-values to the builder.
    fn provide(&self, context: &LoaderContext<'_>, builder: &mut KeyValuesBuilder) -> Result<()>;
}

/// Finds a handler for a resource. `load` returns `None` when the
/// resource's scheme is not this finder's.
pub trait KeyValuesLoaderFinder: Send + Sync {
    /// Registration order; lower binds first.
    fn order(&self) -> i32 {
        0
    }

    /// Load the resource if this finder handles its scheme.
    fn load(&self, context: &LoaderContext<'_>, resource: &Resource) -> Option<Result<KeyValues>>;
}

/// The built-in scheme handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BuiltinLoader {
    Provider,
    Classpath,
    Classpaths,
    File,
    System,
    Stdin,
    Profile,
    Cmd,
    Env,
    Url,
}

impl BuiltinLoader {
    pub(crate) fn all() -> [BuiltinLoader; 10] {
        [
            BuiltinLoader::Provider,
            BuiltinLoader::Classpath,
            BuiltinLoader::Classpaths,
            BuiltinLoader::File,
            BuiltinLoader::System,
            BuiltinLoader::Stdin,
            BuiltinLoader::Profile,
            BuiltinLoader::Cmd,
            BuiltinLoader::Env,
            BuiltinLoader::Url,
        ]
    }

    fn ordinal(&self) -> i32 {
        BuiltinLoader::all()
            .iter()
            .position(|l| l == self)
            .unwrap_or_default() as i32
    }

    fn matches(&self, resource: &Resource) -> bool {
        let scheme = resource.uri().scheme();
        match self {
            BuiltinLoader::Provider => scheme == Some("provider"),
            BuiltinLoader::Classpath => scheme == Some("classpath"),
            BuiltinLoader::Classpaths => scheme == Some("classpaths"),
            BuiltinLoader::File => {
                scheme == Some("file") || (scheme.is_none() && !resource.uri().path().is_empty())
            }
            BuiltinLoader::System => scheme == Some("system"),
            BuiltinLoader::Stdin => scheme == Some("stdin"),
            BuiltinLoader::Profile => {
                scheme.map_or(false, |s| s.starts_with("profile."))
            }
            BuiltinLoader::Cmd => scheme == Some("cmd"),
            BuiltinLoader::Env => scheme == Some("env"),
            BuiltinLoader::Url => matches!(
                scheme,
                Some("jar") | Some("jrt") | Some("vfs") | Some("vfszip") | Some("bundle")
            ),
        }
    }

    fn do_load(&self, context: &LoaderContext<'_>, resource: &Resource) -> Result<KeyValues> {
        match self {
            BuiltinLoader::Provider => load_provider(context, resource),
            BuiltinLoader::Classpath => load_classpath(context, resource),
            BuiltinLoader::Classpaths => load_classpaths(context, resource),
            BuiltinLoader::File => load_file(context, resource),
            BuiltinLoader::System => {
                let kvs = from_map(resource, context.environment().system_properties());
                key_from_uri(context, resource, kvs)
            }
            BuiltinLoader::Stdin => load_stdin(context, resource),
            BuiltinLoader::Profile => load_profiles(context, resource),
            BuiltinLoader::Cmd => load_cmd(context, resource),
            BuiltinLoader::Env => {
                let kvs = from_map(resource, context.environment().system_env());
                key_from_uri(context, resource, kvs)
            }
            BuiltinLoader::Url => {
                let content = context.environment().open_url(resource.uri())?;
                let parser = context.require_parser(resource)?;
                parse_with(parser.as_ref(), resource, &content)
            }
        }
    }
}

impl KeyValuesLoaderFinder for BuiltinLoader {
    fn order(&self) -> i32 {
        BUILTIN_ORDER_START + self.ordinal()
    }

    fn load(&self, context: &LoaderContext<'_>, resource: &Resource) -> Option<Result<KeyValues>> {
        if !self.matches(resource) {
            return None;
        }
        Some(self.do_load(context, resource))
    }
}

/// Parse content into key-values carrying the resource's provenance.
fn parse_with(
    parser: &dyn KeyValuesMedia,
    resource: &Resource,
    content: &str,
) -> Result<KeyValues> {
    let mut builder =
        KeyValuesBuilder::with_source(resource.uri().clone(), resource.reference().cloned());
    parser.parse(content, &mut |k, v| {
        builder.add(k, v);
    })?;
    Ok(builder.build())
}

/// Enumerate a map as key-values with the resource's provenance.
fn from_map(resource: &Resource, map: indexmap::IndexMap<String, String>) -> KeyValues {
    let mut builder =
        KeyValuesBuilder::with_source(resource.uri().clone(), resource.reference().cloned());
    for (k, v) in map {
        builder.add(k, v);
    }
    builder.build()
}

/// Render child declarations as DSL key-values for the scheduler to load.
fn child_resources(resource: &Resource, children: &[Resource]) -> KeyValues {
    let mut builder =
        KeyValuesBuilder::with_source(resource.uri().clone(), resource.reference().cloned());
    for child in children {
        resource_parser::format_resource(child, &mut |k, v| {
            builder.add(k, v);
        });
    }
    builder.build()
}

/// When the URI carries a path selector, re-parse that single key's value
/// as an embedded key-value document.
fn key_from_uri(
    context: &LoaderContext<'_>,
    resource: &Resource,
    kvs: KeyValues,
) -> Result<KeyValues> {
    let path = resource.uri().normalized_path();
    if path.is_empty() {
        return Ok(kvs);
    }
    context.environment().logger().debug(&format!(
        "Using key specified in URI path. key: '{path}' resource: {}",
        resource.describe(false)
    ));
    let selected = kvs.filter(|kv| kv.key() == path);
    let Some(found) = selected.last() else {
        return Err(Error::ResourceNotFound(format!(
            "Key not found specified in URI path. key: '{path}' resource: {}",
            resource.describe(false)
        )));
    };
    let parser = context.require_parser(resource)?;
    parse_with(parser.as_ref(), resource, found.value())
}

fn load_classpath(context: &LoaderContext<'_>, resource: &Resource) -> Result<KeyValues> {
    let path = resource.uri().normalized_path();
    if path.is_empty() {
        return Err(Error::ResourceKeyInvalid(format!(
            "Classpath scheme URI requires a path. URI: {}",
            resource.uri()
        )));
    }
    let content = context.environment().resource_loader().open(path)?;
    let parser = context.require_parser(resource)?;
    parse_with(parser.as_ref(), resource, &content)
}

fn load_classpaths(context: &LoaderContext<'_>, resource: &Resource) -> Result<KeyValues> {
    let path = resource.uri().normalized_path();
    if path.is_empty() {
        return Err(Error::ResourceKeyInvalid(format!(
            "Classpaths scheme URI requires a path. URI: {}",
            resource.uri()
        )));
    }
    let uris = context.environment().resource_loader().list(path)?;

    // The enumeration can hand back duplicates.
    let mut seen: HashSet<String> = HashSet::new();
    let mut children = Vec::new();
    let mut i = 0;
    for uri in uris {
        if !seen.insert(uri.as_str().to_string()) {
            continue;
        }
        // Children may not chain further loads.
        let child = resource
            .to_builder()
            .name(format!("{}{i}", resource.name()))
            .uri(uri)
            .flag(LoadFlags::NO_LOAD_CHILDREN)
            .build()?;
        children.push(child);
        i += 1;
    }
    Ok(child_resources(resource, &children))
}

fn load_file(context: &LoaderContext<'_>, resource: &Resource) -> Result<KeyValues> {
    let path = Path::new(resource.uri().path());
    let resolved = match context.environment().cwd() {
        Some(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_path_buf(),
    };
    let content = match std::fs::read_to_string(&resolved) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::ResourceNotFound(format!(
                "File not found. path: '{}'",
                resolved.display()
            )))
        }
        Err(e) => return Err(Error::Io(e)),
    };
    let parser = context.require_parser(resource)?;
    parse_with(parser.as_ref(), resource, &content)
}

fn load_cmd(context: &LoaderContext<'_>, resource: &Resource) -> Result<KeyValues> {
    let mut builder =
        KeyValuesBuilder::with_source(resource.uri().clone(), resource.reference().cloned());
    for arg in context.environment().main_args() {
        if let Some((key, value)) = arg.split_once('=') {
            builder.add(key, value);
        }
    }
    key_from_uri(context, resource, builder.build())
}

fn load_stdin(context: &LoaderContext<'_>, resource: &Resource) -> Result<KeyValues> {
    let parameters = resource.parameters();
    let args = context.environment().main_args();
    let enabled = parameters.get("stdin").map(String::as_str) == Some("true")
        || match parameters.get("stdin_arg") {
            Some(flag) => args.iter().any(|a| a == flag),
            None => {
                let default_flag = format!("--{}", resource.name());
                args.iter().any(|a| a == &default_flag)
            }
        };
    if !enabled {
        return Err(Error::ResourceNotFound(format!(
            "stdin is not enabled for resource. resource: {}",
            resource.describe(false)
        )));
    }
    let bytes = context.environment().read_standard_input()?;
    let content = String::from_utf8(bytes)
        .map_err(|e| Error::Media(format!("stdin is not valid UTF-8: {e}")))?;

    let path = resource.uri().normalized_path();
    let mut builder =
        KeyValuesBuilder::with_source(resource.uri().clone(), resource.reference().cloned());
    if path.is_empty() {
        let parser = context.require_parser(resource)?;
        parser.parse(&content, &mut |k, v| {
            builder.add(k, v);
        })?;
    } else {
        // A path binds the whole raw input to that key.
        builder.add(path, content);
    }
    Ok(builder.build())
}

fn load_provider(context: &LoaderContext<'_>, resource: &Resource) -> Result<KeyValues> {
    if context.providers.is_empty() {
        return Err(Error::ResourceNotFound("No providers found".to_string()));
    }
    let path = resource.uri().normalized_path().trim();
    if path.is_empty() {
        // Fan out: one child per provider, inheriting this resource's
        // configuration, loaded through the scheduler like any resource.
        let mut children = Vec::with_capacity(context.providers.len());
        for (i, provider) in context.providers.iter().enumerate() {
            let child = resource
                .to_builder()
                .name(format!("{}{i}", provider.name()))
                .uri(Uri::parse(&format!("provider:///{}", provider.name())))
                .build()?;
            children.push(child);
        }
        return Ok(child_resources(resource, &children));
    }
    let provider = context
        .providers
        .iter()
        .find(|p| p.name() == path)
        .ok_or_else(|| Error::ResourceNotFound(format!("Provider not found. name='{path}'")))?;
    let mut builder =
        KeyValuesBuilder::with_source(resource.uri().clone(), resource.reference().cloned());
    provider.provide(context, &mut builder)?;
    Ok(builder.build())
}

fn load_profiles(context: &LoaderContext<'_>, resource: &Resource) -> Result<KeyValues> {
    let rest = match resource.uri().as_str().strip_prefix("profile.") {
        Some(rest) => rest,
        None => resource.uri().as_str(),
    };

    let csv = resource
        .parameters()
        .get("profile")
        .or_else(|| resource.parameters().get("profiles"))
        .cloned()
        .or_else(|| context.variables.get_value("_profile"))
        .or_else(|| context.variables.get_value("_profiles"));
    let Some(csv) = csv else {
        context.environment().logger().info(&format!(
            "Profile(s) could not be found for resource. resource: {} tried parameter: {}",
            resource.describe(false),
            resource_parser::format_parameter_key(resource, "profile")
        ));
        return Err(Error::ResourceNotFound(
            "profile parameter is required. Set it to CSV list of profiles.".to_string(),
        ));
    };

    if !rest.contains(PROFILE_TOKEN) {
        return Err(Error::ResourceKeyInvalid(format!(
            "Resource needs '{PROFILE_TOKEN}' in URI to be replaced by extracted profiles. URI: {rest}"
        )));
    }

    let mut profiles: Vec<&str> = Vec::new();
    for profile in csv.split(',') {
        let profile = profile.trim();
        if !profile.is_empty() && !profiles.contains(&profile) {
            profiles.push(profile);
        }
    }
    context
        .environment()
        .logger()
        .info(&format!("Found profiles: [{}]", profiles.join(", ")));

    let mut children = Vec::with_capacity(profiles.len());
    for (i, profile) in profiles.iter().enumerate() {
        let child = resource
            .to_builder()
            .name(format!("{}{i}", resource.name()))
            .uri(Uri::parse(&rest.replace(PROFILE_TOKEN, profile)))
            .build()?;
        children.push(child);
    }
    Ok(child_resources(resource, &children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::BuiltinMediaFinder;
    use crate::variables::EmptyVariables;

    struct TestEnvironment {
        args: Vec<String>,
        stdin: Vec<u8>,
        properties: indexmap::IndexMap<String, String>,
        resources: crate::environment::MapResourceLoader,
    }

    impl Default for TestEnvironment {
        fn default() -> Self {
            TestEnvironment {
                args: Vec::new(),
                stdin: Vec::new(),
                properties: indexmap::IndexMap::new(),
                resources: crate::environment::MapResourceLoader::new(),
            }
        }
    }

    impl Environment for TestEnvironment {
        fn main_args(&self) -> Vec<String> {
            self.args.clone()
        }

        fn system_properties(&self) -> indexmap::IndexMap<String, String> {
            self.properties.clone()
        }

        fn read_standard_input(&self) -> std::io::Result<Vec<u8>> {
            Ok(self.stdin.clone())
        }

        fn resource_loader(&self) -> &dyn crate::environment::ResourceLoader {
            &self.resources
        }
    }

    fn media() -> CompositeMediaFinder {
        CompositeMediaFinder::new(vec![Arc::new(BuiltinMediaFinder::default())])
    }

    fn dispatch(environment: &dyn Environment, resource: &Resource) -> Result<KeyValues> {
        let media = media();
        let vars = EmptyVariables;
        let context = LoaderContext {
            environment,
            media: &media,
            variables: &vars,
            providers: &[],
        };
        for loader in BuiltinLoader::all() {
            if let Some(result) = loader.load(&context, resource) {
                return result;
            }
        }
        Err(Error::LoaderNotFound("no loader".to_string()))
    }

    fn resource(uri: &str) -> Resource {
        Resource::builder(uri).name("test").build().unwrap()
    }

    #[test]
    fn test_classpath_loads_and_parses() {
        let env = TestEnvironment {
            resources: crate::environment::MapResourceLoader::new()
                .put("app.properties", "a=1\nb=2\n"),
            ..Default::default()
        };
        let kvs = dispatch(&env, &resource("classpath:/app.properties")).unwrap();
        assert_eq!(kvs.len(), 2);
        let first = kvs.iter().next().unwrap();
        assert_eq!(first.meta().source.uri.as_str(), "classpath:/app.properties");
        assert_eq!(first.meta().source.index, 1);
    }

    #[test]
    fn test_classpath_missing_is_not_found() {
        let env = TestEnvironment::default();
        let err = dispatch(&env, &resource("classpath:/missing.properties")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_system_key_selector() {
        let mut properties = indexmap::IndexMap::new();
        properties.insert("nested".to_string(), "x=1\ny=2".to_string());
        let env = TestEnvironment {
            properties,
            ..Default::default()
        };
        let r = Resource::builder("system:///nested")
            .name("system")
            .media_type("properties")
            .build()
            .unwrap();
        let kvs = dispatch(&env, &r).unwrap();
        let keys: Vec<_> = kvs.iter().map(|kv| kv.key()).collect();
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[test]
    fn test_system_key_selector_missing() {
        let env = TestEnvironment::default();
        let r = Resource::builder("system:///nope")
            .name("system")
            .media_type("properties")
            .build()
            .unwrap();
        assert!(dispatch(&env, &r).unwrap_err().is_not_found());
    }

    #[test]
    fn test_cmd_parses_key_value_args() {
        let env = TestEnvironment {
            args: vec!["ignored".to_string(), "a=1".to_string(), "b=2".to_string()],
            ..Default::default()
        };
        let kvs = dispatch(&env, &resource("cmd:///")).unwrap();
        let keys: Vec<_> = kvs.iter().map(|kv| kv.key()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_stdin_gated_by_default_arg() {
        let env = TestEnvironment {
            stdin: b"password=guest\n".to_vec(),
            ..Default::default()
        };
        let r = Resource::builder("stdin:///")
            .name("passwords")
            .media_type("properties")
            .build()
            .unwrap();
        // Not enabled: no --passwords argument.
        assert!(dispatch(&env, &r).unwrap_err().is_not_found());

        let env = TestEnvironment {
            args: vec!["--passwords".to_string()],
            stdin: b"password=guest\n".to_vec(),
            ..Default::default()
        };
        let kvs = dispatch(&env, &r).unwrap();
        assert_eq!(kvs.iter().next().unwrap().key(), "password");
    }

    #[test]
    fn test_stdin_path_binds_raw_input() {
        let env = TestEnvironment {
            args: vec!["--secrets".to_string()],
            stdin: b"raw blob".to_vec(),
            ..Default::default()
        };
        let r = Resource::builder("stdin:///mykey?_p_secrets_x=y")
            .name("secrets")
            .build()
            .unwrap();
        let kvs = dispatch(&env, &r).unwrap();
        let kv = kvs.iter().next().unwrap();
        assert_eq!(kv.key(), "mykey");
        assert_eq!(kv.raw(), "raw blob");
    }

    #[test]
    fn test_file_loader_with_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.properties");
        std::fs::write(&file, "k=v\n").unwrap();
        let env = TestEnvironment::default();
        let kvs = dispatch(&env, &resource(&format!("file:{}", file.display()))).unwrap();
        assert_eq!(kvs.iter().next().unwrap().key(), "k");

        let err = dispatch(
            &env,
            &resource(&format!("file:{}/missing.properties", dir.path().display())),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_profile_fan_out_declarations() {
        let env = TestEnvironment::default();
        let r = Resource::builder("profile.classpath:/app-__PROFILE__.properties")
            .name("profiles")
            .parameter("profile", "dev, prod, dev")
            .build()
            .unwrap();
        let kvs = dispatch(&env, &r).unwrap();
        let pairs: Vec<(String, String)> = kvs
            .iter()
            .map(|kv| (kv.key().to_string(), kv.value().to_string()))
            .collect();
        // Duplicates collapse; order preserved.
        assert_eq!(
            pairs,
            vec![
                (
                    "_load_profiles0".to_string(),
                    "classpath:/app-dev.properties".to_string()
                ),
                (
                    "_load_profiles1".to_string(),
                    "classpath:/app-prod.properties".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_profile_requires_parameter() {
        let env = TestEnvironment::default();
        let r = Resource::builder("profile.classpath:/app-__PROFILE__.properties")
            .name("profiles")
            .build()
            .unwrap();
        assert!(dispatch(&env, &r).unwrap_err().is_not_found());
    }

    #[test]
    fn test_profile_requires_token() {
        let env = TestEnvironment::default();
        let r = Resource::builder("profile.classpath:/app.properties")
            .name("profiles")
            .parameter("profile", "dev")
            .build()
            .unwrap();
        let err = dispatch(&env, &r).unwrap_err();
        assert!(matches!(err, Error::ResourceKeyInvalid(_)));
    }

    #[test]
    fn test_classpaths_fan_out_forces_no_children() {
        let env = TestEnvironment {
            resources: crate::environment::MapResourceLoader::new()
                .put("star.properties", "s=1\n"),
            ..Default::default()
        };
        let kvs = dispatch(&env, &resource("classpaths:/star.properties")).unwrap();
        let pairs: Vec<(String, String)> = kvs
            .iter()
            .map(|kv| (kv.key().to_string(), kv.value().to_string()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (
                    "_load_test0".to_string(),
                    "classpath:/star.properties".to_string()
                ),
                ("_flags_test0".to_string(), "NO_LOAD_CHILDREN".to_string()),
            ]
        );
    }

    #[test]
    fn test_provider_not_registered() {
        let env = TestEnvironment::default();
        let err = dispatch(&env, &resource("provider:///")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_no_loader_for_unknown_scheme() {
        let env = TestEnvironment::default();
        let err = dispatch(&env, &resource("weird:///thing")).unwrap_err();
        assert!(matches!(err, Error::LoaderNotFound(_)));
    }
}
