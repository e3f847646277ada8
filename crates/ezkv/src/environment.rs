/*
 * environment.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The environment facade.
//!
//! Everything the loader takes from the outside world goes through
//! [`Environment`]: process args, system properties, environment
//! variables, standard input, the resource loader, a URL opener, a random
//! source, the working directory, and the logger. Tests substitute a fake
//! environment; embedding applications can override any piece.
//!
//! Logging is an event facade rather than a framework binding because
//! configuration usually loads before logging is configured. The default
//! logger forwards to `tracing`, which is inert until a subscriber is
//! installed; [`RecordingLogger`] captures a replayable transcript.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::uri::Uri;

static NOOP_LOGGER: NoOpLogger = NoOpLogger;
static EMPTY_RESOURCES: EmptyResourceLoader = EmptyResourceLoader;

/// A facade over system-level collaborators used while loading.
pub trait Environment: Send + Sync {
    /// The program's command-line arguments (without the program name).
    fn main_args(&self) -> Vec<String> {
        Vec::new()
    }

    /// System properties: an application-level property map distinct from
    /// process environment variables. Empty by default.
    fn system_properties(&self) -> IndexMap<String, String> {
        IndexMap::new()
    }

    /// Process environment variables.
    fn system_env(&self) -> IndexMap<String, String> {
        std::env::vars().collect()
    }

    /// Read standard input to EOF. Blocking; only called by the gated
    /// `stdin` scheme.
    fn read_standard_input(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        std::io::stdin().lock().read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// A random value, for extensions that need one.
    fn random_u64(&self) -> u64 {
        rand::random()
    }

    /// The directory relative file resources resolve against.
    fn cwd(&self) -> Option<PathBuf> {
        std::env::current_dir().ok()
    }

    /// The loader behind the `classpath`/`classpaths` schemes. The
    /// default knows no resources.
    fn resource_loader(&self) -> &dyn ResourceLoader {
        &EMPTY_RESOURCES
    }

    /// Open a generic URL scheme (`jar`, `jrt`, ...) and return its
    /// content. Unsupported by default; hosts wire in an opener.
    fn open_url(&self, uri: &Uri) -> Result<String> {
        Err(Error::LoaderNotFound(format!(
            "No URL opener configured. URI: {uri}"
        )))
    }

    /// The logger receiving load events.
    fn logger(&self) -> &dyn Logger {
        &NOOP_LOGGER
    }

    /// The resource loaded when a loader is built with no sources.
    fn default_resource(&self) -> Resource {
        Resource::builder("classpath:/boot.properties")
            .name("root")
            .build()
            .expect("default resource is valid")
    }
}

/// Opens named resources, akin to a classpath.
pub trait ResourceLoader: Send + Sync {
    /// Open the resource at `path` and return its content.
    fn open(&self, path: &str) -> Result<String>;

    /// Enumerate every location providing `path`, for the `classpaths`
    /// fan-out scheme.
    fn list(&self, path: &str) -> Result<Vec<Uri>> {
        let _ = path;
        Ok(Vec::new())
    }
}

/// A resource loader that knows no resources.
#[derive(Debug, Default)]
pub struct EmptyResourceLoader;

impl ResourceLoader for EmptyResourceLoader {
    fn open(&self, path: &str) -> Result<String> {
        Err(Error::ResourceNotFound(format!(
            "Resource path cannot be found: '{path}'"
        )))
    }
}

/// A resource loader over an in-memory map, mainly for tests.
#[derive(Debug, Default)]
pub struct MapResourceLoader {
    entries: IndexMap<String, String>,
}

impl MapResourceLoader {
    /// Create an empty loader.
    pub fn new() -> MapResourceLoader {
        MapResourceLoader::default()
    }

    /// Register content under a path.
    pub fn put(mut self, path: impl Into<String>, content: impl Into<String>) -> MapResourceLoader {
        self.entries.insert(path.into(), content.into());
        self
    }
}

impl ResourceLoader for MapResourceLoader {
    fn open(&self, path: &str) -> Result<String> {
        self.entries.get(path).cloned().ok_or_else(|| {
            Error::ResourceNotFound(format!("Resource path cannot be found: '{path}'"))
        })
    }

    fn list(&self, path: &str) -> Result<Vec<Uri>> {
        Ok(self
            .entries
            .keys()
            .filter(|k| k.as_str() == path)
            .map(|k| Uri::parse(&format!("classpath:/{k}")))
            .collect())
    }
}

/// A resource loader resolving paths against an ordered list of root
/// directories, the filesystem analog of a classpath.
#[derive(Debug, Default)]
pub struct DirectoryResourceLoader {
    roots: Vec<PathBuf>,
}

impl DirectoryResourceLoader {
    /// Create a loader with no roots.
    pub fn new() -> DirectoryResourceLoader {
        DirectoryResourceLoader::default()
    }

    /// Append a root directory.
    pub fn root(mut self, root: impl AsRef<Path>) -> DirectoryResourceLoader {
        self.roots.push(root.as_ref().to_path_buf());
        self
    }
}

impl ResourceLoader for DirectoryResourceLoader {
    fn open(&self, path: &str) -> Result<String> {
        for root in &self.roots {
            let candidate = root.join(path);
            match std::fs::read_to_string(&candidate) {
                Ok(content) => return Ok(content),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(Error::ResourceNotFound(format!(
            "Resource path cannot be found: '{path}'"
        )))
    }

    fn list(&self, path: &str) -> Result<Vec<Uri>> {
        let mut found = Vec::new();
        for root in &self.roots {
            let candidate = root.join(path);
            if candidate.is_file() {
                found.push(Uri::parse(&format!("file:{}", candidate.display())));
            }
        }
        Ok(found)
    }
}

/// Load-event logging facade.
///
/// These are events more than log lines: implementations may capture and
/// replay them once the real logging system is up.
pub trait Logger: Send + Sync {
    /// Log a debug-level message.
    fn debug(&self, message: &str);

    /// Log an info-level message.
    fn info(&self, message: &str);

    /// Log a warn-level message.
    fn warn(&self, message: &str);

    /// The system was built.
    fn init(&self) {}

    /// The system will not load anything further.
    fn closed(&self) {}

    /// An unrecoverable load failure, reported before it propagates.
    fn fatal(&self, error: &Error) {
        let _ = error;
    }

    /// A resource is about to load.
    fn load(&self, resource: &Resource) {
        self.debug(&format!("Loading {}", resource.describe(true)));
    }

    /// A resource loaded successfully.
    fn loaded(&self, resource: &Resource) {
        self.info(&format!("Loaded  {}", resource.describe(false)));
    }

    /// A resource was missing and `NO_REQUIRE` tolerated it.
    fn missing(&self, resource: &Resource, error: &Error) {
        let _ = error;
        self.debug(&format!("Missing {}", resource.describe(false)));
    }
}

/// A logger that discards everything.
#[derive(Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
}

/// Forwards events to `tracing`. Inert until a subscriber is installed.
#[derive(Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "ezkv", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "ezkv", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "ezkv", "{message}");
    }

    fn fatal(&self, error: &Error) {
        tracing::error!(target: "ezkv", "{error}");
    }
}

/// Captures the event transcript, level-tagged, in order.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<String>>,
}

impl RecordingLogger {
    /// Create an empty recorder.
    pub fn new() -> RecordingLogger {
        RecordingLogger::default()
    }

    fn push(&self, line: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(line);
        }
    }

    /// The captured events, in order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// The transcript as one newline-terminated string.
    pub fn transcript(&self) -> String {
        self.events().iter().map(|line| format!("{line}\n")).collect()
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, message: &str) {
        self.push(format!("[DEBUG] {message}"));
    }

    fn info(&self, message: &str) {
        self.push(format!("[INFO ] {message}"));
    }

    fn warn(&self, message: &str) {
        self.push(format!("[WARN ] {message}"));
    }
}

/// The default environment: real process state, tracing-backed logging,
/// and no classpath-like resources.
#[derive(Debug, Default)]
pub struct DefaultEnvironment {
    args: Option<Vec<String>>,
    logger: TracingLogger,
}

impl DefaultEnvironment {
    /// An environment with no known command-line arguments.
    pub fn new() -> DefaultEnvironment {
        DefaultEnvironment::default()
    }

    /// An environment with explicit command-line arguments.
    pub fn with_args(args: Vec<String>) -> DefaultEnvironment {
        DefaultEnvironment {
            args: Some(args),
            logger: TracingLogger,
        }
    }
}

impl Environment for DefaultEnvironment {
    fn main_args(&self) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None => std::env::args().skip(1).collect(),
        }
    }

    fn logger(&self) -> &dyn Logger {
        &self.logger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_logger_transcript() {
        let logger = RecordingLogger::new();
        logger.debug("one");
        logger.info("two");
        logger.warn("three");
        assert_eq!(
            logger.transcript(),
            "[DEBUG] one\n[INFO ] two\n[WARN ] three\n"
        );
    }

    #[test]
    fn test_logger_load_event_format() {
        let logger = RecordingLogger::new();
        let resource = Resource::builder("system:///")
            .name("system")
            .flag(crate::resource::LoadFlags::NO_ADD)
            .build()
            .unwrap();
        logger.load(&resource);
        logger.loaded(&resource);
        assert_eq!(
            logger.events(),
            vec![
                "[DEBUG] Loading uri='system:///' flags=[NO_ADD]",
                "[INFO ] Loaded  uri='system:///' flags=[NO_ADD]",
            ]
        );
    }

    #[test]
    fn test_map_resource_loader() {
        let loader = MapResourceLoader::new().put("app.properties", "a=1\n");
        assert_eq!(loader.open("app.properties").unwrap(), "a=1\n");
        assert!(loader.open("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_directory_resource_loader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conf.properties"), "x=1\n").unwrap();
        let loader = DirectoryResourceLoader::new().root(dir.path());
        assert_eq!(loader.open("conf.properties").unwrap(), "x=1\n");
        assert!(loader.open("nope").unwrap_err().is_not_found());
        assert_eq!(loader.list("conf.properties").unwrap().len(), 1);
        assert!(loader.list("nope").unwrap().is_empty());
    }

    #[test]
    fn test_default_environment_args() {
        let env = DefaultEnvironment::with_args(vec!["--passwords".to_string()]);
        assert_eq!(env.main_args(), vec!["--passwords".to_string()]);
    }
}
