//! Typed errors for the module lifecycle engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that make a manager unusable before it ever runs.
///
/// These are the only errors surfaced synchronously to the caller; everything
/// that happens inside the watch loops is handled locally (log and continue).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The watched path exists but is not a directory.
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    /// No usable build toolchain on this machine.
    #[error("build toolchain not found: {0}")]
    ToolchainMissing(String),

    /// A toolchain was found but its version cannot drive the pipeline.
    #[error("build toolchain too old: found {found}, need {required} or newer")]
    ToolchainIncompatible { found: String, required: String },

    /// `rustc --version` produced output we cannot interpret.
    #[error("cannot parse toolchain version from {0:?}")]
    ToolchainUnrecognized(String),

    /// `start` was called on a manager that is not freshly created.
    #[error("manager already started")]
    AlreadyStarted,

    /// Setting up the filesystem watch failed.
    #[error("watch setup failed: {source}")]
    Watch {
        #[from]
        source: notify::Error,
    },

    /// An I/O error surfaced while preparing directories.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Errors from one compile-and-load attempt.
///
/// A build error never disturbs the previously loaded version of the module;
/// the attempt is logged, no add/update event fires, and the registry is left
/// exactly as it was.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The compiler exited non-zero; `diagnostics` is its stderr, verbatim.
    #[error("compiler reported errors:\n{diagnostics}")]
    Compile { diagnostics: String },

    /// The compiler exited cleanly but the expected artifact is missing.
    #[error("compiler produced no artifact at {0}")]
    ArtifactMissing(PathBuf),

    /// The dynamic loader rejected the artifact.
    #[error("failed to load artifact {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// A symbol lookup on a loaded module failed.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// An I/O error surfaced during the attempt (reading source, scanning
    /// artifacts).
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Errors from a remote store round-trip.
///
/// During a poll cycle these are transient: the cycle is skipped, the snapshot
/// table is left untouched and the next interval retries automatically.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KvError {
    /// The store could not be reached or rejected the request.
    #[error("store request failed: {0}")]
    Transport(String),

    /// The store answered but its payload could not be decoded.
    #[error("cannot decode store payload: {0}")]
    Decode(String),
}
