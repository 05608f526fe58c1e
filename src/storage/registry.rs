//! The process-wide driver catalogue and its search path.
//!
//! Grounded on `uid.rs`'s `Dictionary` (static + dynamic entries, a
//! name-keyed lookup); here every entry is "dynamic" since drivers are
//! registered at runtime rather than compiled in, and lookups fall
//! through to on-disk resolution when the name isn't yet known.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{Driver, Error, PluginResolutionFailedSnafu, Result};
use crate::settings::PLUGIN_EXTENSION;
use crate::{Arc, RwLock, Vec};

/// Discovers the drivers a loadable module on disk exports. The actual
/// on-disk discovery mechanism is an external collaborator;
/// [`DylibLoader`] is the registry's default, real implementation of
/// this seam.
pub trait PluginLoader: Send + Sync {
    /// Load `path` and return every driver it exports.
    fn load(&self, path: &Path) -> Result<Vec<Arc<dyn Driver>>>;
}

/// The well-known symbol every storage-driver module exports: a
/// zero-argument function returning the driver it implements.
///
/// Plugin and host must agree on Rust compiler version and ABI; this
/// mirrors what small Rust plugin loaders typically guarantee and is
/// documented as a caller responsibility, not re-checked at runtime.
pub type PluginEntryPoint = unsafe fn() -> Box<dyn Driver>;

pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"dlite_driver_entry";

/// Default [`PluginLoader`]: loads a native shared library and calls its
/// [`PLUGIN_ENTRY_SYMBOL`] export.
pub struct DylibLoader;

impl PluginLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Vec<Arc<dyn Driver>>> {
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| Error::DriverIo {
            driver: path.display().to_string(),
            message: e.to_string(),
        })?;
        let entry: libloading::Symbol<PluginEntryPoint> =
            unsafe { library.get(PLUGIN_ENTRY_SYMBOL) }.map_err(|e| Error::DriverIo {
                driver: path.display().to_string(),
                message: e.to_string(),
            })?;
        let driver: Box<dyn Driver> = unsafe { entry() };
        // Leak the library so the driver's vtable stays valid for the
        // process lifetime; drivers are unloaded only at process exit.
        std::mem::forget(library);
        Ok(vec![Arc::from(driver)])
    }
}

struct Entry {
    name: String,
    driver: Arc<dyn Driver>,
}

/// Snapshot counts returned by [`Registry::metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryMetrics {
    pub registered_drivers: usize,
    pub search_path_len: usize,
}

struct Inner {
    entries: Vec<Entry>,
    search_path: Vec<PathBuf>,
}

/// Process-wide catalogue of named storage drivers, keyed by
/// [`Driver::name`], plus the search path used to resolve names that
/// aren't registered yet.
pub struct Registry {
    inner: RwLock<Inner>,
    loader: Box<dyn PluginLoader>,
}

impl Registry {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self::with_loader(search_path, Box::new(DylibLoader))
    }

    pub fn with_loader(search_path: Vec<PathBuf>, loader: Box<dyn PluginLoader>) -> Self {
        Registry { inner: RwLock::new(Inner { entries: Vec::new(), search_path }), loader }
    }

    /// Register a driver explicitly, as a statically-linked driver would
    /// during process startup.
    pub fn register(&self, driver: Arc<dyn Driver>) {
        let name = driver.name().to_owned();
        let mut inner = self.inner.write().expect("dlite registry poisoned");
        inner.entries.retain(|e| e.name != name);
        inner.entries.push(Entry { name, driver });
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.read().expect("dlite registry poisoned").entries.iter().any(|e| e.name == name)
    }

    pub fn unload(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("dlite registry poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|e| e.name != name);
        inner.entries.len() != before
    }

    pub fn unload_all(&self) {
        self.inner.write().expect("dlite registry poisoned").entries.clear();
    }

    /// Register every driver discoverable anywhere on the search path.
    pub fn load_all(&self) -> Result<()> {
        let candidates = self.candidate_modules();
        for path in candidates {
            match self.loader.load(&path) {
                Ok(drivers) => {
                    for driver in drivers {
                        self.register(driver);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed loading plugin module"),
            }
        }
        Ok(())
    }

    /// Names of every currently registered driver.
    pub fn iter_names(&self) -> Vec<String> {
        self.inner.read().expect("dlite registry poisoned").entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner.read().expect("dlite registry poisoned").search_path.clone()
    }

    /// Snapshot counts useful for diagnostics and tests: how many
    /// drivers are registered and how many directories are searched.
    pub fn metrics(&self) -> RegistryMetrics {
        let inner = self.inner.read().expect("dlite registry poisoned");
        RegistryMetrics { registered_drivers: inner.entries.len(), search_path_len: inner.search_path.len() }
    }

    /// Insert `path` at `index`; negative indices count from the end
    /// (`-1` appends), out-of-range indices clip to the nearest valid
    /// position.
    pub fn path_insert(&self, index: i64, path: impl Into<PathBuf>) {
        let mut inner = self.inner.write().expect("dlite registry poisoned");
        let len = inner.search_path.len();
        let at = clip_index(index, len, true);
        inner.search_path.insert(at, path.into());
    }

    pub fn path_append(&self, path: impl Into<PathBuf>) {
        self.inner.write().expect("dlite registry poisoned").search_path.push(path.into());
    }

    /// Remove the path at `index`; negative indices count from the end.
    /// Out-of-range indices are a no-op.
    pub fn path_remove(&self, index: i64) {
        let mut inner = self.inner.write().expect("dlite registry poisoned");
        let len = inner.search_path.len();
        if len == 0 {
            return;
        }
        let at = clip_index(index, len, false);
        if at < inner.search_path.len() {
            inner.search_path.remove(at);
        }
    }

    fn candidate_modules(&self) -> Vec<PathBuf> {
        let search_path = self.paths();
        let mut out = Vec::new();
        for dir in &search_path {
            let Ok(entries) = std::fs::read_dir(dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension() == Some(OsStr::new(PLUGIN_EXTENSION)) {
                    out.push(path);
                }
            }
        }
        out
    }

    /// Resolve `name` to a driver via a four-step algorithm:
    /// already-registered, named module on the search path, any module
    /// on the search path whose embedded name matches, else fail with a
    /// diagnostic naming the search path.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Driver>> {
        if let Some(driver) = self.lookup(name) {
            return Ok(driver);
        }

        let search_path = self.paths();
        let named_module = search_path.iter().map(|dir| dir.join(format!("{name}.{PLUGIN_EXTENSION}")));
        for candidate in named_module {
            if candidate.is_file() {
                if let Ok(drivers) = self.loader.load(&candidate) {
                    for driver in drivers {
                        self.register(driver);
                    }
                    if let Some(driver) = self.lookup(name) {
                        info!(driver = name, path = %candidate.display(), "resolved storage driver by filename");
                        return Ok(driver);
                    }
                }
            }
        }

        for candidate in self.candidate_modules() {
            if let Ok(drivers) = self.loader.load(&candidate) {
                for driver in drivers {
                    self.register(driver);
                }
            }
        }
        if let Some(driver) = self.lookup(name) {
            info!(driver = name, "resolved storage driver by scanning search path");
            return Ok(driver);
        }

        PluginResolutionFailedSnafu {
            name: name.to_owned(),
            search_path: search_path.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        }
        .fail()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.inner
            .read()
            .expect("dlite registry poisoned")
            .entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| Arc::clone(&e.driver))
    }
}

/// Clip a possibly-negative, possibly-out-of-range index into `[0,
/// len]` (`for_insert = true`) or `[0, len)` (`for_insert = false`).
///
/// For `for_insert`, a negative index counts insertion points from the
/// end, so `-1` means "after the last element" (i.e. append) rather than
/// "at the last element": `-1` resolves to `len`, `-2` to `len - 1`, etc.
fn clip_index(index: i64, len: usize, for_insert: bool) -> usize {
    let max = if for_insert { len } else { len.saturating_sub(1) };
    let resolved = if index < 0 {
        let from_end = len as i64 + index;
        if for_insert { from_end + 1 } else { from_end }
    } else {
        index
    };
    resolved.clamp(0, max as i64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockDriver;

    #[test]
    fn register_and_unload_round_trip() {
        let registry = Registry::new(Vec::<PathBuf>::new());
        registry.register(Arc::new(MockDriver::new("json")));
        assert!(registry.is_registered("json"));
        assert!(registry.unload("json"));
        assert!(!registry.is_registered("json"));
    }

    #[test]
    fn resolve_fails_with_search_path_in_diagnostic() {
        let registry = Registry::new(vec![PathBuf::from("/no/such/dir")]);
        let err = registry.resolve("json").unwrap_err();
        assert!(err.to_string().contains("/no/such/dir"));
    }

    #[test]
    fn negative_path_indices_count_from_the_end() {
        let registry = Registry::new(Vec::<PathBuf>::new());
        registry.path_append("a");
        registry.path_append("b");
        registry.path_insert(-1, "c");
        assert_eq!(registry.paths(), vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")]);
        registry.path_remove(-1);
        assert_eq!(registry.paths(), vec![PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn metrics_reflect_registered_drivers_and_search_path() {
        let registry = Registry::new(vec![PathBuf::from("/no/such/dir")]);
        registry.register(Arc::new(MockDriver::new("json")));
        registry.register(Arc::new(MockDriver::new("mem")));
        let metrics = registry.metrics();
        assert_eq!(metrics.registered_drivers, 2);
        assert_eq!(metrics.search_path_len, 1);
    }

    #[test]
    fn out_of_range_indices_clip() {
        let registry = Registry::new(Vec::<PathBuf>::new());
        registry.path_append("a");
        registry.path_insert(100, "b");
        assert_eq!(registry.paths(), vec![PathBuf::from("a"), PathBuf::from("b")]);
        registry.path_remove(100);
        assert_eq!(registry.paths(), vec![PathBuf::from("a")]);
    }
}
