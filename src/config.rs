//! The configuration handle.
//!
//! [`Config`] owns the live [`FlatStore`], the [`ShapeCache`] used for typed
//! binding, and the background watch task that reloads the store when a
//! source file changes on disk.
//!
//! # Example
//!
//! ```rust,no_run
//! use flat_config::{Config, record};
//!
//! #[record]
//! #[derive(Debug, Default)]
//! struct Database {
//!     #[record(path = "database.host")]
//!     host: String,
//!     #[record(path = "database.port")]
//!     port: u16,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new();
//!     config.open(["base.conf", "local.json"])?;
//!
//!     // Scalar lookups
//!     let host = config.get_string_or("database.host", "localhost");
//!
//!     // Typed binding
//!     let db: Database = config.bind()?;
//!     println!("{host} {}", db.port);
//!
//!     config.set_on_reload(|| println!("configuration reloaded"));
//!     Ok(())
//! }
//! ```
//!
//! # Lifecycle
//!
//! 1. **Open**: [`open`](Config::open) parses every source, swaps the new
//!    store in and starts watching the files.
//! 2. **Read**: every `get_*` and `bind*` call works on a snapshot taken
//!    under a shared lock, so it never sees half of a reload.
//! 3. **Reload**: triggered by a file change or by [`reload`](Config::reload).
//!    A failed reload keeps the previous store.
//! 4. **Close**: [`close`](Config::close) stops the watch task. The store
//!    stays readable.
use std::{
    collections::{BTreeMap, HashMap},
    ops::ControlFlow,
    path::PathBuf,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use derive_builder::Builder;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::{
    Document, FlatStore, Record, ShapeCache, ShapeMap,
    error::{Error, Result},
    reconstruct,
    shape::{self, auto_detect, extract, parse_bool},
    source,
    watch::{self, Dispatcher, WatchHandle},
};

/// Options for a [`Config`] instance.
///
/// ```rust
/// use std::time::Duration;
/// use flat_config::ConfigOptions;
///
/// let options = ConfigOptions::builder()
///     .watch(false)
///     .debounce(Duration::from_millis(100))
///     .build()
///     .unwrap();
/// assert!(!options.watch);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct ConfigOptions {
    /// Start a watch task when sources are opened.
    #[builder(default = "true")]
    pub watch: bool,
    /// Change notifications arriving within this window trigger one reload.
    #[builder(default = "Duration::from_millis(50)")]
    pub debounce: Duration,
    /// Poll interval for notify backends that poll.
    #[builder(default = "Duration::from_secs(2)")]
    pub poll_interval: Duration,
}

impl ConfigOptions {
    pub fn builder() -> ConfigOptionsBuilder {
        ConfigOptionsBuilder::default()
    }
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            watch: true,
            debounce: Duration::from_millis(50),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Point-in-time counters for a [`Config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigStats {
    pub entries: usize,
    pub cached_shapes: usize,
    pub watched_files: usize,
    pub watching: bool,
    pub reloading: bool,
    pub reloads: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Result of asking a [`Config`] to start watching its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchStart {
    Started,
    /// The watch task is already running. It keeps watching the files it was
    /// started with, even if [`Config::open`] has since been given others.
    AlreadyWatching,
    /// Watching is turned off in [`ConfigOptions`].
    Disabled,
    /// The watch task was closed or failed to start earlier. It is started at
    /// most once per instance.
    Stopped,
}

enum WatchState {
    Idle,
    Watching(WatchHandle),
    Failed,
    Closed,
}

struct Inner {
    store: RwLock<Arc<FlatStore>>,
    sources: RwLock<Vec<PathBuf>>,
    /// Serializes `open` and `reload`.
    gate: Mutex<()>,
    shapes: ShapeCache,
    reloading: AtomicBool,
    reloads: AtomicU64,
    watch: Mutex<WatchState>,
    on_reload: Arc<Dispatcher>,
    options: ConfigOptions,
}

/// A hot-reloadable flat configuration store.
///
/// `Config` is a cheap handle: clones share the same store, cache and watch
/// task. Dropping the last handle stops the watch task.
#[derive(Clone)]
pub struct Config {
    inner: Arc<Inner>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("sources", &*self.inner.sources.read())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::with_options(ConfigOptions::default())
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: RwLock::new(Arc::new(FlatStore::new())),
                sources: RwLock::new(Vec::new()),
                gate: Mutex::new(()),
                shapes: ShapeCache::new(),
                reloading: AtomicBool::new(false),
                reloads: AtomicU64::new(0),
                watch: Mutex::new(WatchState::Idle),
                on_reload: Arc::new(Dispatcher::default()),
                options,
            }),
        }
    }

    pub fn options(&self) -> &ConfigOptions {
        &self.inner.options
    }

    /// Loads `paths` in order (later sources override earlier ones) and
    /// replaces the current store, then starts watching the sources.
    ///
    /// On a read or parse error the current store is left untouched. If only
    /// the watch setup fails, the new store is already live and the error is
    /// [`Error::WatchSetup`].
    ///
    /// The watch task starts once per instance and keeps watching the files
    /// given to the first `open` that started it. Opening a different set of
    /// files later replaces the store and what [`reload`](Config::reload)
    /// reads, but changes to the new files do not trigger reloads on their
    /// own.
    pub fn open<I, P>(&self, paths: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        if paths.is_empty() {
            return Err(Error::EmptyInput);
        }

        {
            let _gate = self.inner.gate.lock();
            let store = source::build_store(&paths)?;
            let entries = store.len();

            *self.inner.store.write() = Arc::new(store);
            tracing::info!(sources = ?paths, entries, "configuration loaded");
            *self.inner.sources.write() = paths;
        }

        self.watch().map(|_| ())
    }

    /// Rebuilds the store from the sources recorded by the last
    /// [`open`](Config::open).
    ///
    /// On success the reload callback is dispatched on its own thread and may
    /// still be running when this returns.
    pub fn reload(&self) -> Result<()> {
        {
            let _gate = self.inner.gate.lock();
            let paths = self.inner.sources.read().clone();
            if paths.is_empty() {
                return Err(Error::NoSourceLoaded);
            }

            self.inner.reloading.store(true, Ordering::Release);
            let result = source::build_store(&paths);
            self.inner.reloading.store(false, Ordering::Release);

            let store = result?;
            let entries = store.len();
            *self.inner.store.write() = Arc::new(store);
            let reloads = self.inner.reloads.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::info!(entries, reloads, "configuration reloaded");
        }

        self.inner.on_reload.notify();
        Ok(())
    }

    /// Starts the watch task for the current sources.
    ///
    /// Only the first successful call starts a task; later calls report why
    /// nothing was started.
    pub fn watch(&self) -> Result<WatchStart> {
        if !self.inner.options.watch {
            return Ok(WatchStart::Disabled);
        }

        let mut state = self.inner.watch.lock();
        match *state {
            WatchState::Watching(_) => return Ok(WatchStart::AlreadyWatching),
            WatchState::Failed | WatchState::Closed => return Ok(WatchStart::Stopped),
            WatchState::Idle => {}
        }

        let paths = self.inner.sources.read().clone();
        if paths.is_empty() {
            return Err(Error::NoSourceLoaded);
        }

        let weak = Arc::downgrade(&self.inner);
        let spawned = watch::spawn(
            &paths,
            self.inner.options.debounce,
            self.inner.options.poll_interval,
            move || reload_from_watch(&weak),
        );

        match spawned {
            Ok(handle) => {
                *state = WatchState::Watching(handle);
                Ok(WatchStart::Started)
            }
            Err(e) => {
                tracing::warn!(error = %e, "configuration watch unavailable");
                *state = WatchState::Failed;
                Err(e)
            }
        }
    }

    /// Registers the function run after every successful reload, replacing
    /// any earlier one.
    ///
    /// The callback runs on a separate thread. At most one invocation runs
    /// at a time; reloads that finish while it is running are folded into a
    /// single follow-up invocation.
    pub fn set_on_reload<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.on_reload.set(Arc::new(callback));
    }

    /// Stops the watch task. Safe to call repeatedly and before
    /// [`open`](Config::open). The store stays readable.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.inner.watch.lock(), WatchState::Closed);
        if let WatchState::Watching(handle) = previous {
            drop(handle);
            tracing::info!("configuration watch closed");
        }
    }

    /// The store as of now. Later reloads do not affect the returned value.
    pub fn snapshot(&self) -> Arc<FlatStore> {
        self.inner.store.read().clone()
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        self.inner.sources.read().clone()
    }

    pub fn stats(&self) -> ConfigStats {
        ConfigStats {
            entries: self.inner.store.read().len(),
            cached_shapes: self.inner.shapes.len(),
            watched_files: self.inner.sources.read().len(),
            watching: matches!(*self.inner.watch.lock(), WatchState::Watching(_)),
            reloading: self.inner.reloading.load(Ordering::Acquire),
            reloads: self.inner.reloads.load(Ordering::Acquire),
            cache_hits: self.inner.shapes.hits(),
            cache_misses: self.inner.shapes.misses(),
        }
    }

    // ---- Shapes ----

    /// The shape of `T`, extracted once per instance.
    pub fn shapes_for<T: Record>(&self) -> Arc<ShapeMap> {
        self.inner
            .shapes
            .get_or_compute(T::type_identity(), extract::<T>)
    }

    /// Extracts the shape of every record registered with `#[record]` and
    /// returns how many were warmed.
    pub fn warm_shape_cache(&self) -> usize {
        shape::registered()
            .map(|record| {
                self.inner
                    .shapes
                    .get_or_compute((record.type_identity)(), record.extract)
            })
            .count()
    }

    pub fn clear_shape_cache(&self) {
        self.inner.shapes.clear();
    }

    // ---- Binding ----

    /// Binds the current store onto `T`, picking nested or flat mode from the
    /// record's fields.
    pub fn bind<T: Record>(&self) -> Result<T> {
        reconstruct::bind(&self.snapshot(), &self.shapes_for::<T>())
    }

    pub fn bind_nested<T: Record>(&self) -> Result<T> {
        reconstruct::bind_nested(&self.snapshot(), &self.shapes_for::<T>())
    }

    pub fn bind_flat<T: Record>(&self) -> Result<T> {
        reconstruct::bind_flat(&self.snapshot(), &self.shapes_for::<T>())
    }

    /// Rebuilds the whole store as one document, typed by `T`'s shape.
    pub fn reconstruct_as<T: Record>(&self) -> Document {
        reconstruct::reconstruct(&self.snapshot(), &self.shapes_for::<T>())
    }

    /// Binds `prefix.0.*`, `prefix.1.*`, ... onto `T`, stopping at the first
    /// missing index.
    pub fn get_array_to<T: Record>(&self, prefix: &str) -> Result<Vec<T>> {
        let store = self.snapshot();
        let shapes = self.shapes_for::<T>();

        let mut items = Vec::new();
        for index in 0usize.. {
            let element = store.subtree(&shape::join(prefix, &index.to_string()));
            if element.is_empty() {
                break;
            }
            items.push(reconstruct::bind::<T>(&element, &shapes)?);
        }
        Ok(items)
    }

    // ---- Scalars ----

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.inner.store.read().get(path).map(str::to_string)
    }

    /// The value at `path`, or `default` when it is missing or empty.
    pub fn get_string_or(&self, path: &str, default: &str) -> String {
        match self.get_string(path) {
            Some(value) if !value.is_empty() => value,
            _ => default.to_string(),
        }
    }

    pub fn get_int(&self, path: &str) -> Option<i64> {
        self.parse(path, |raw| raw.parse().ok())
    }

    pub fn get_int_or(&self, path: &str, default: i64) -> i64 {
        self.get_int(path).unwrap_or(default)
    }

    /// Accepts `true`/`false` in any of the usual spellings as well as
    /// `1`/`0` and `t`/`f`.
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.parse(path, parse_bool)
    }

    pub fn get_bool_or(&self, path: &str, default: bool) -> bool {
        self.get_bool(path).unwrap_or(default)
    }

    pub fn get_f32(&self, path: &str) -> Option<f32> {
        self.parse(path, |raw| raw.parse().ok())
    }

    pub fn get_f32_or(&self, path: &str, default: f32) -> f32 {
        self.get_f32(path).unwrap_or(default)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.parse(path, |raw| raw.parse().ok())
    }

    pub fn get_f64_or(&self, path: &str, default: f64) -> f64 {
        self.get_f64(path).unwrap_or(default)
    }

    fn parse<T>(&self, path: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let store = self.inner.store.read();
        store
            .get(path)
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .and_then(parse)
    }

    // ---- Arrays ----

    /// `prefix.0`, `prefix.1`, ... up to the first missing index.
    pub fn get_array_string(&self, prefix: &str) -> Vec<String> {
        let store = self.snapshot();
        store.array(prefix).map(str::to_string).collect()
    }

    /// One map per index holding the requested `fields` of `prefix.<i>`.
    /// Stops at the first index where none of the fields is present.
    pub fn get_array_object(&self, prefix: &str, fields: &[&str]) -> Vec<HashMap<String, String>> {
        let store = self.snapshot();

        let mut items = Vec::new();
        for index in 0usize.. {
            let element = shape::join(prefix, &index.to_string());
            let item: HashMap<String, String> = fields
                .iter()
                .filter_map(|field| {
                    store
                        .get(&shape::join(&element, field))
                        .map(|value| (field.to_string(), value.to_string()))
                })
                .collect();

            if item.is_empty() {
                break;
            }
            items.push(item);
        }
        items
    }

    /// Like [`get_array_object`](Config::get_array_object), with every key
    /// found under `prefix.<i>` as a field.
    pub fn get_array_object_auto(&self, prefix: &str) -> Vec<HashMap<String, String>> {
        let store = self.snapshot();

        let mut items = Vec::new();
        for index in 0usize.. {
            let element = store.subtree(&shape::join(prefix, &index.to_string()));
            if element.is_empty() {
                break;
            }
            items.push(element.into());
        }
        items
    }

    // ---- Export ----

    pub fn get_all(&self) -> HashMap<String, String> {
        self.inner.store.read().to_map()
    }

    /// Every entry with its type guessed from the raw value.
    pub fn get_all_typed(&self) -> BTreeMap<String, Document> {
        let store = self.snapshot();
        store
            .iter()
            .map(|(path, raw)| (path.to_string(), auto_detect(raw)))
            .collect()
    }

    pub fn get_all_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.get_all_typed())?)
    }

    /// All keys, sorted.
    pub fn get_all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.store.read().keys().map(str::to_string).collect();
        keys.sort_unstable();
        keys
    }
}

fn reload_from_watch(inner: &Weak<Inner>) -> ControlFlow<()> {
    let Some(inner) = inner.upgrade() else {
        return ControlFlow::Break(());
    };

    if let Err(e) = (Config { inner }).reload() {
        tracing::warn!(error = %e, "reload after file change failed, keeping previous configuration");
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn unwatched() -> Config {
        Config::with_options(ConfigOptions::builder().watch(false).build().unwrap())
    }

    #[test]
    fn test_options_defaults() {
        let built = ConfigOptions::builder().build().unwrap();
        assert_eq!(built, ConfigOptions::default());
        assert!(built.watch);
        assert_eq!(built.debounce, Duration::from_millis(50));
    }

    #[test]
    fn test_scalar_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        fs::write(
            &path,
            "[app]\nname = demo\nempty =\nport = 8080\nbad_port = eighty\nratio = 0.5\nflag = 1\n",
        )
        .unwrap();

        let config = unwatched();
        config.open([&path]).unwrap();

        assert_eq!(config.get_string_or("app.name", "x"), "demo");
        assert_eq!(config.get_string_or("app.empty", "fallback"), "fallback");
        assert_eq!(config.get_string_or("app.missing", "fallback"), "fallback");
        assert_eq!(config.get_int_or("app.port", 0), 8080);
        assert_eq!(config.get_int_or("app.bad_port", 7), 7);
        assert_eq!(config.get_f64_or("app.ratio", 0.0), 0.5);
        assert_eq!(config.get_f32_or("app.missing", 1.5), 1.5);
        assert!(config.get_bool_or("app.flag", false));
        assert!(config.get_bool_or("app.missing", true));
    }

    #[test]
    fn test_watch_before_open_needs_sources() {
        let config = Config::new();
        assert!(matches!(config.watch(), Err(Error::NoSourceLoaded)));
    }

    #[test]
    fn test_watch_disabled_by_options() {
        assert_eq!(unwatched().watch().unwrap(), WatchStart::Disabled);
    }

    #[test]
    fn test_close_before_open_is_noop() {
        let config = Config::new();
        config.close();
        config.close();
        assert!(!config.stats().watching);
    }
}
