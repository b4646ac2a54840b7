//! Compile-and-load pipeline
//!
//! Turns a module name plus its current source text into a freshly compiled,
//! uniquely versioned, loaded record. The version counter lives in memory and
//! is recovered from the artifact directory on first touch of a name, so
//! numbering survives manager restarts for as long as old artifacts remain on
//! disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::compiler::Toolchain;
use crate::error::BuildError;
use crate::loader::{ModuleLibrary, ModuleRecord};

pub(crate) struct BuildPipeline {
    toolchain: Toolchain,
    source_dir: PathBuf,
    artifact_dir: PathBuf,
    extension: String,
    edition: String,
    /// Last version successfully built per module name. The authoritative
    /// counter; the artifact-directory scan is only the recovery fallback.
    versions: HashMap<String, u64>,
}

impl BuildPipeline {
    pub(crate) fn new(
        toolchain: Toolchain,
        source_dir: PathBuf,
        artifact_dir: PathBuf,
        extension: &str,
        edition: &str,
    ) -> Self {
        Self {
            toolchain,
            source_dir,
            artifact_dir,
            extension: extension.to_string(),
            edition: edition.to_string(),
            versions: HashMap::new(),
        }
    }

    /// Compile the module's source file and load the resulting artifact.
    ///
    /// On any failure the previous record (held by the registry) is
    /// untouched. A version number is considered spent once an artifact for
    /// it exists on disk, even if the subsequent load fails; a compile
    /// failure leaves the counter where it was.
    pub(crate) async fn compile_and_load(
        &mut self,
        name: &str,
        source: String,
    ) -> Result<Arc<ModuleRecord>, BuildError> {
        let version = self.next_version(name);
        let artifact = self.artifact_dir.join(artifact_file_name(name, version));
        let salt = format!("{name}.{version:09}");
        let source_path = self.source_dir.join(format!("{name}.{}", self.extension));

        self.toolchain
            .compile(name, &source_path, &artifact, &salt, &self.edition)
            .await?;
        self.versions.insert(name.to_string(), version);

        let library = ModuleLibrary::open(&artifact)?;
        info!(module = name, version, artifact = %artifact.display(), "module loaded");
        Ok(Arc::new(ModuleRecord::new(name, version, library, source)))
    }

    fn next_version(&self, name: &str) -> u64 {
        match self.versions.get(name) {
            Some(last) => last + 1,
            None => self
                .highest_version_on_disk(name)
                .map(|last| last + 1)
                .unwrap_or(0),
        }
    }

    /// Highest version suffix among this name's artifacts still on disk.
    fn highest_version_on_disk(&self, name: &str) -> Option<u64> {
        let entries = std::fs::read_dir(&self.artifact_dir).ok()?;
        let prefix = format!("{name}.");
        let suffix = format!(".{}", std::env::consts::DLL_EXTENSION);

        entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|file_name| {
                let middle = file_name.strip_prefix(&prefix)?.strip_suffix(&suffix)?;
                if middle.is_empty() || !middle.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                middle.parse::<u64>().ok()
            })
            .max()
    }
}

fn artifact_file_name(name: &str, version: u64) -> String {
    format!("{name}.{version:09}.{}", std::env::consts::DLL_EXTENSION)
}
