//! Remote-to-filesystem bridge
//!
//! Materializes store changes as files inside the watched directory, so the
//! remote store becomes just another producer of filesystem notifications and
//! the directory watcher machinery is reused unmodified.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::differ::{KvAction, KvChange};

/// Applies [`KvChange`]s as file writes and deletions under one directory.
pub struct MirrorBridge {
    target_dir: PathBuf,
    /// Prefix plus separator, stripped off the front of every key.
    strip: String,
    /// Source suffix with the dot, e.g. `.rs`.
    suffix: String,
}

impl MirrorBridge {
    /// Bridge changes under `key_prefix` into `target_dir`.
    pub fn new(
        target_dir: impl Into<PathBuf>,
        key_prefix: &str,
        separator: char,
        extension: &str,
    ) -> Self {
        Self {
            target_dir: target_dir.into(),
            strip: format!("{key_prefix}{separator}"),
            suffix: format!(".{extension}"),
        }
    }

    /// Apply one change. Side-effect failures are logged, never propagated —
    /// the consuming loop has nobody to report to.
    pub fn apply(&self, change: &KvChange) {
        let name = self.local_name(&change.key);
        match change.action {
            KvAction::Added => {
                // New keys must look like a compile unit; updates and removals
                // of a key that somehow slipped in are still honored.
                if !name.ends_with(&self.suffix) {
                    warn!(key = %change.key, "bad module key, must end in {}", self.suffix);
                    return;
                }
                self.materialize(name, &change.value);
            }
            KvAction::Updated => self.materialize(name, &change.value),
            KvAction::Removed => self.unmaterialize(name),
        }
    }

    /// File a key materializes to, for callers that need to look.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.target_dir.join(self.local_name(key))
    }

    fn local_name<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.strip).unwrap_or(key)
    }

    fn materialize(&self, name: &str, value: &[u8]) {
        let path = self.target_dir.join(name);
        if let Err(e) = fs::write(&path, value) {
            warn!(path = %path.display(), error = %e, "failed to materialize key");
        } else {
            debug!(path = %path.display(), bytes = value.len(), "materialized key");
        }
    }

    fn unmaterialize(&self, name: &str) {
        let path = self.target_dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "unmaterialized key"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "key already unmaterialized");
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to unmaterialize key"),
        }
    }

    /// Directory this bridge writes into.
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(action: KvAction, key: &str, value: &[u8]) -> KvChange {
        KvChange {
            action,
            key: key.to_string(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_added_key_materializes() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = MirrorBridge::new(dir.path(), "app.plugins", '.', "rs");

        bridge.apply(&change(KvAction::Added, "app.plugins.alpha.rs", b"fn f() {}"));

        let written = std::fs::read(dir.path().join("alpha.rs")).unwrap();
        assert_eq!(written, b"fn f() {}");
    }

    #[test]
    fn test_added_key_with_wrong_suffix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = MirrorBridge::new(dir.path(), "app.plugins", '.', "rs");

        bridge.apply(&change(KvAction::Added, "app.plugins.readme.txt", b"hi"));
        assert!(!dir.path().join("readme.txt").exists());
    }

    #[test]
    fn test_update_overwrites_and_ignores_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = MirrorBridge::new(dir.path(), "app.plugins", '.', "rs");

        bridge.apply(&change(KvAction::Added, "app.plugins.alpha.rs", b"v1"));
        bridge.apply(&change(KvAction::Updated, "app.plugins.alpha.rs", b"v2"));
        assert_eq!(std::fs::read(dir.path().join("alpha.rs")).unwrap(), b"v2");

        // updates bypass the suffix gate, as the original system did
        bridge.apply(&change(KvAction::Updated, "app.plugins.stray.txt", b"x"));
        assert!(dir.path().join("stray.txt").exists());
    }

    #[test]
    fn test_remove_deletes_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = MirrorBridge::new(dir.path(), "app.plugins", '.', "rs");

        bridge.apply(&change(KvAction::Added, "app.plugins.alpha.rs", b"v1"));
        bridge.apply(&change(KvAction::Removed, "app.plugins.alpha.rs", b""));
        assert!(!dir.path().join("alpha.rs").exists());

        // double delete is a logged no-op
        bridge.apply(&change(KvAction::Removed, "app.plugins.alpha.rs", b""));
    }

    #[test]
    fn test_unprefixed_key_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = MirrorBridge::new(dir.path(), "app.plugins", '.', "rs");
        assert_eq!(bridge.path_for("loose.rs"), dir.path().join("loose.rs"));
        assert_eq!(
            bridge.path_for("app.plugins.alpha.rs"),
            dir.path().join("alpha.rs")
        );
    }
}
