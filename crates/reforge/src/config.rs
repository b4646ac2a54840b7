//! Manager configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a [`ModuleManager`](crate::ModuleManager).
///
/// Built in the usual way: start from [`Default`] and chain `with_*` setters.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// File extension (without the dot) that marks a compile unit.
    pub source_extension: String,
    /// Interval between remote store polls.
    pub poll_interval: Duration,
    /// Debounce window for rapid successive writes to one source file.
    pub debounce: Duration,
    /// Rust edition the source units are compiled under.
    pub edition: String,
    /// Where compiled artifacts land. `None` means a managed temporary
    /// directory; point this at a stable directory to let version numbering
    /// survive manager restarts.
    pub artifact_dir: Option<PathBuf>,
    /// Separator between the store key prefix and the file name part of a key.
    pub key_separator: char,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            source_extension: "rs".to_string(),
            poll_interval: Duration::from_secs(3),
            debounce: Duration::from_millis(500),
            edition: "2021".to_string(),
            artifact_dir: None,
            key_separator: '.',
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recognized source file extension (without the dot).
    pub fn with_source_extension(mut self, ext: &str) -> Self {
        self.source_extension = ext.trim_start_matches('.').to_string();
        self
    }

    /// Set the remote store polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the write debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the Rust edition source units are compiled under.
    pub fn with_edition(mut self, edition: &str) -> Self {
        self.edition = edition.to_string();
        self
    }

    /// Use a stable artifact directory instead of a managed temporary one.
    pub fn with_artifact_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.artifact_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the separator between the key prefix and the file name in store keys.
    pub fn with_key_separator(mut self, separator: char) -> Self {
        self.key_separator = separator;
        self
    }
}
