//! Native artifact loading
//!
//! Wraps the dynamic-loading collaborator: an artifact path goes in, an
//! opaque handle supporting named-symbol lookup comes out. The host platform
//! offers no way to unload machine code, so a superseded library simply stays
//! resident until every holder of its record is gone.

use std::fmt;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::BuildError;

/// A loaded artifact.
pub struct ModuleLibrary {
    path: PathBuf,
    library: Library,
    loaded_at: std::time::Instant,
}

impl ModuleLibrary {
    pub(crate) fn open(path: &Path) -> Result<Self, BuildError> {
        let library = unsafe { Library::new(path) }.map_err(|e| BuildError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            library,
            loaded_at: std::time::Instant::now(),
        })
    }

    /// Path of the artifact this handle was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the artifact was loaded.
    pub fn loaded_at(&self) -> std::time::Instant {
        self.loaded_at
    }

    /// Look up an exported symbol by name.
    ///
    /// # Safety
    /// The caller must supply the symbol's true type; the loader cannot check
    /// it, and a mismatch is undefined behavior on first use.
    pub unsafe fn symbol<T>(&self, name: &[u8]) -> Result<Symbol<'_, T>, BuildError> {
        unsafe { self.library.get(name) }.map_err(|e| {
            BuildError::SymbolNotFound(format!("{}: {e}", String::from_utf8_lossy(name)))
        })
    }
}

impl fmt::Debug for ModuleLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLibrary")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for ModuleLibrary {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "dropping module library");
    }
}

/// One live module: its loaded library plus the source text that produced it.
///
/// Records are immutable; every successful rebuild produces a fresh record
/// and the registry swaps it in. Holders of an old record may keep calling
/// into it — the library stays alive as long as the record does — it just
/// never sees further updates.
#[derive(Debug)]
pub struct ModuleRecord {
    name: String,
    version: u64,
    library: ModuleLibrary,
    source: String,
    source_hash: String,
}

impl ModuleRecord {
    pub(crate) fn new(name: &str, version: u64, library: ModuleLibrary, source: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        let source_hash = format!("{:x}", hasher.finalize());
        Self {
            name: name.to_string(),
            version,
            library,
            source,
            source_hash,
        }
    }

    /// Module name (source file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build version this record came from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The loaded library handle.
    pub fn library(&self) -> &ModuleLibrary {
        &self.library
    }

    /// Source text this build was produced from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// SHA-256 of the source text, hex-encoded.
    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    /// Convenience passthrough to [`ModuleLibrary::symbol`].
    ///
    /// # Safety
    /// Same contract as [`ModuleLibrary::symbol`].
    pub unsafe fn symbol<T>(&self, name: &[u8]) -> Result<Symbol<'_, T>, BuildError> {
        unsafe { self.library.symbol(name) }
    }
}
