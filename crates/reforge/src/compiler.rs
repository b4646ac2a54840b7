//! External build toolchain
//!
//! The compiler is an external collaborator: `rustc`, located on PATH at
//! construction time and invoked as a child process per build. Contract:
//! zero exit status and artifact present means success, anything else is a
//! failure carrying the compiler's stderr verbatim.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{BuildError, ConfigError};

/// Oldest compiler the pipeline is known to work with.
pub const MIN_RUSTC: RustcVersion = RustcVersion { major: 1, minor: 77 };

/// A `major.minor` compiler version; patch level never matters here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RustcVersion {
    pub major: u32,
    pub minor: u32,
}

impl RustcVersion {
    /// Parse out of `rustc --version` output, e.g.
    /// `rustc 1.85.0 (4d91de4e4 2025-02-17)`.
    pub fn parse(text: &str) -> Option<Self> {
        let number = text.split_whitespace().nth(1)?;
        let mut parts = number.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some(Self { major, minor })
    }
}

impl fmt::Display for RustcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Handle on a probed, version-checked compiler.
#[derive(Debug, Clone)]
pub struct Toolchain {
    rustc: PathBuf,
    version: RustcVersion,
}

impl Toolchain {
    /// Locate `rustc` on PATH and verify it is recent enough.
    pub fn probe() -> Result<Self, ConfigError> {
        let rustc =
            which::which("rustc").map_err(|e| ConfigError::ToolchainMissing(e.to_string()))?;

        let output = Command::new(&rustc).arg("--version").output()?;
        if !output.status.success() {
            return Err(ConfigError::ToolchainUnrecognized(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let version = RustcVersion::parse(&text)
            .ok_or_else(|| ConfigError::ToolchainUnrecognized(text.clone().into_owned()))?;
        if version < MIN_RUSTC {
            return Err(ConfigError::ToolchainIncompatible {
                found: version.to_string(),
                required: MIN_RUSTC.to_string(),
            });
        }

        info!(rustc = %rustc.display(), %version, "build toolchain ready");
        Ok(Self { rustc, version })
    }

    /// The probed compiler version.
    pub fn version(&self) -> RustcVersion {
        self.version
    }

    /// Compile one source unit into a loadable artifact.
    ///
    /// The salt is baked into the build via `-C metadata`, so two builds of
    /// the same unit with different salts never share symbol identities —
    /// which is what lets a fresh build coexist with a still-loaded old one.
    pub async fn compile(
        &self,
        name: &str,
        source: &Path,
        artifact: &Path,
        salt: &str,
        edition: &str,
    ) -> Result<(), BuildError> {
        debug!(module = name, artifact = %artifact.display(), salt, "compiling");

        let output = tokio::process::Command::new(&self.rustc)
            .arg("--edition")
            .arg(edition)
            .arg("--crate-type")
            .arg("cdylib")
            .arg("--crate-name")
            .arg(crate_name_for(name))
            .arg("-C")
            .arg(format!("metadata={salt}"))
            .arg("-o")
            .arg(artifact)
            .arg(source)
            .output()
            .await?;

        if !output.status.success() {
            return Err(BuildError::Compile {
                diagnostics: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        if !artifact.exists() {
            return Err(BuildError::ArtifactMissing(artifact.to_path_buf()));
        }
        Ok(())
    }
}

/// Map a module name onto a legal crate name: alphanumerics and underscores
/// only, never starting with a digit.
fn crate_name_for(name: &str) -> String {
    let mut crate_name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if crate_name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        crate_name.insert(0, '_');
    }
    crate_name
}
