//! Process-wide configuration knobs.
//!
//! A handful of knobs the core actually needs: where the plugin
//! registry looks for loadable drivers, and whether `storage_open` is
//! allowed to retry resolution after a registry mutation.

use std::path::PathBuf;

/// Environment variable holding a platform-separated (`:` on POSIX, `;`
/// on Windows) list of directories to search for storage-driver
/// modules.
pub const PLUGIN_DIRS_ENV: &str = "DLITE_STORAGE_PLUGIN_DIRS";

/// Platform module extension storage-driver plugins are expected to
/// carry.
#[cfg(target_os = "windows")]
pub const PLUGIN_EXTENSION: &str = "dll";
#[cfg(not(target_os = "windows"))]
pub const PLUGIN_EXTENSION: &str = "so";

#[cfg(target_os = "windows")]
pub const PATH_SEPARATOR: char = ';';
#[cfg(not(target_os = "windows"))]
pub const PATH_SEPARATOR: char = ':';

/// Process-wide settings, kept here only for introspection/diagnostics —
/// there is no dynamic settings store to back it since only these few
/// knobs exist.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Development-time override path searched before the environment
    /// variable's directories.
    pub build_root_override: Option<PathBuf>,
    /// Whether `storage_open` re-attempts driver resolution if the
    /// registry was mutated since the last failed attempt.
    pub retry_resolution_after_mutation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings { build_root_override: None, retry_resolution_after_mutation: true }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build_root_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_root_override = Some(path.into());
        self
    }

    /// The initial search path: build-root override first (if any), then
    /// every directory named in [`PLUGIN_DIRS_ENV`].
    pub fn initial_search_path(&self) -> crate::Vec<PathBuf> {
        let mut paths = crate::Vec::new();
        if let Some(root) = &self.build_root_override {
            paths.push(root.clone());
        }
        if let Ok(value) = std::env::var(PLUGIN_DIRS_ENV) {
            paths.extend(value.split(PATH_SEPARATOR).filter(|s| !s.is_empty()).map(PathBuf::from));
        }
        paths
    }
}
