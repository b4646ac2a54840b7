//! Hot-reloading module manager
//!
//! Watches a set of source-code units — a local directory, or a remote
//! key/value store mirrored into one — compiles each changed unit into a
//! separately loadable native artifact, loads it into the running process,
//! and notifies subscribers so application behavior can be swapped without a
//! restart:
//! - Directory watching with create/write/rename/remove translation
//! - Remote store polling with snapshot diffing and file materialization
//! - Versioned, collision-free compile-and-load through external `rustc`
//! - Ordered scan/add/update/remove fan-out to registered callbacks
//!
//! ```no_run
//! use reforge::{ManagerConfig, ModuleManager};
//!
//! # async fn demo() -> Result<(), reforge::ConfigError> {
//! let mut manager = ModuleManager::watch_dir("./modules", ManagerConfig::default())?;
//! manager.on_add(|name, record| {
//!     println!("module {name} arrived (build {})", record.version());
//! });
//! manager.start().await?;
//! // ... later
//! manager.terminate().await;
//! # Ok(())
//! # }
//! ```
//!
//! A superseded build's machine code is never unloaded — replaced versions
//! are retired, not reclaimed, which is a constraint of the platform's native
//! loader and a deliberate part of the contract: whoever still holds an old
//! record may keep calling into it.

mod compiler;
mod config;
mod differ;
mod error;
mod event;
pub mod kv;
mod loader;
mod manager;
mod mirror;
mod pipeline;
mod registry;
mod watcher;

pub use compiler::{MIN_RUSTC, RustcVersion, Toolchain};
pub use config::ManagerConfig;
pub use differ::{KvAction, KvChange, SnapshotDiffer};
pub use error::{BuildError, ConfigError, KvError};
pub use event::{EventKind, ModuleSet, SubscriptionHub};
pub use kv::{ConsulKv, KvStore, MemoryKv, RemoteEntry};
pub use loader::{ModuleLibrary, ModuleRecord};
pub use manager::ModuleManager;
pub use mirror::MirrorBridge;
pub use registry::ModuleRegistry;
pub use watcher::{SourceAction, SourceIntent};
