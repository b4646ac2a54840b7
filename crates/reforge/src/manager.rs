//! Lifecycle orchestrator
//!
//! Wires the differ, mirror, watcher, pipeline and hub together. One manager
//! instance moves linearly through Created → Started → Terminated; the
//! registry is only ever mutated on its single routing path, so module state
//! needs no locking discipline beyond the registry's own.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::compiler::Toolchain;
use crate::config::ManagerConfig;
use crate::differ::{KvChange, SnapshotDiffer};
use crate::error::ConfigError;
use crate::event::{ModuleSet, SubscriptionHub};
use crate::kv::KvStore;
use crate::loader::ModuleRecord;
use crate::mirror::MirrorBridge;
use crate::pipeline::BuildPipeline;
use crate::registry::ModuleRegistry;
use crate::watcher::{SourceAction, SourceIntent, SourceWatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Started,
    Terminated,
}

struct StoreBinding {
    store: Arc<dyn KvStore>,
    key_prefix: String,
}

/// Hot-reloading module manager.
///
/// Construct with [`watch_dir`](Self::watch_dir) or
/// [`watch_store`](Self::watch_store), register subscribers, then
/// [`start`](Self::start) inside a tokio runtime. Events from one producer
/// arrive strictly in order; between the directory and the remote store no
/// relative order is guaranteed — an application that materializes a key and
/// immediately edits the resulting file by hand can race, and that is
/// accepted.
pub struct ModuleManager {
    config: ManagerConfig,
    source_dir: PathBuf,
    store: Option<StoreBinding>,
    watcher: SourceWatcher,
    pipeline: Option<BuildPipeline>,
    registry: ModuleRegistry,
    hub: Arc<SubscriptionHub>,
    phase: Phase,
    differ_shutdown: Option<mpsc::Sender<()>>,
    router_shutdown: Option<mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
    /// Guards keeping managed temporary directories alive.
    _scratch_dir: Option<TempDir>,
    _artifact_dir: Option<TempDir>,
}

impl ModuleManager {
    /// Watch a local directory of compile units.
    pub fn watch_dir<P: AsRef<Path>>(dir: P, config: ManagerConfig) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let metadata = fs::metadata(dir)?;
        if !metadata.is_dir() {
            return Err(ConfigError::NotADirectory(dir.to_path_buf()));
        }
        Self::assemble(dir.to_path_buf(), None, None, config)
    }

    /// Watch a remote store's key prefix, mirrored into a managed scratch
    /// directory.
    pub fn watch_store(
        store: Arc<dyn KvStore>,
        key_prefix: impl Into<String>,
        config: ManagerConfig,
    ) -> Result<Self, ConfigError> {
        let scratch = tempfile::Builder::new().prefix("reforge-mirror-").tempdir()?;
        let source_dir = scratch.path().to_path_buf();
        Self::assemble(
            source_dir,
            Some(scratch),
            Some(StoreBinding {
                store,
                key_prefix: key_prefix.into(),
            }),
            config,
        )
    }

    fn assemble(
        source_dir: PathBuf,
        scratch_dir: Option<TempDir>,
        store: Option<StoreBinding>,
        config: ManagerConfig,
    ) -> Result<Self, ConfigError> {
        let toolchain = Toolchain::probe()?;

        let (artifact_dir, artifact_guard) = match &config.artifact_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let guard = tempfile::Builder::new()
                    .prefix("reforge-artifacts-")
                    .tempdir()?;
                (guard.path().to_path_buf(), Some(guard))
            }
        };

        let watcher = SourceWatcher::new(
            source_dir.clone(),
            &config.source_extension,
            config.debounce,
        );
        let pipeline = BuildPipeline::new(
            toolchain,
            source_dir.clone(),
            artifact_dir,
            &config.source_extension,
            &config.edition,
        );

        Ok(Self {
            config,
            source_dir,
            store,
            watcher,
            pipeline: Some(pipeline),
            registry: ModuleRegistry::new(),
            hub: Arc::new(SubscriptionHub::new()),
            phase: Phase::Created,
            differ_shutdown: None,
            router_shutdown: None,
            tasks: Vec::new(),
            _scratch_dir: scratch_dir,
            _artifact_dir: artifact_guard,
        })
    }

    /// Subscribe to the start-time scan event.
    pub fn on_scan<F>(&self, callback: F)
    where
        F: Fn(&ModuleSet) + Send + Sync + 'static,
    {
        self.hub.on_scan(callback);
    }

    /// Subscribe to module-added events.
    pub fn on_add<F>(&self, callback: F)
    where
        F: Fn(&str, &Arc<ModuleRecord>) + Send + Sync + 'static,
    {
        self.hub.on_add(callback);
    }

    /// Subscribe to module-updated events.
    pub fn on_update<F>(&self, callback: F)
    where
        F: Fn(&str, &Arc<ModuleRecord>) + Send + Sync + 'static,
    {
        self.hub.on_update(callback);
    }

    /// Subscribe to module-removed events.
    pub fn on_remove<F>(&self, callback: F)
    where
        F: Fn(&str, &Arc<ModuleRecord>) + Send + Sync + 'static,
    {
        self.hub.on_remove(callback);
    }

    /// Current record for one module.
    pub fn module(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        self.registry.get(name)
    }

    /// Snapshot of all live modules.
    pub fn modules(&self) -> ModuleSet {
        self.registry.snapshot()
    }

    /// Sorted names of all live modules.
    pub fn module_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Shared handle on the registry.
    pub fn registry(&self) -> ModuleRegistry {
        self.registry.clone()
    }

    /// The watched directory. For store mode this is the managed scratch
    /// directory keys materialize into.
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Start watching: spin up the remote poll loop (if a store is bound),
    /// the directory watch, run one full scan, publish the scan event, then
    /// hand routing over to the background loop.
    pub async fn start(&mut self) -> Result<(), ConfigError> {
        if self.phase != Phase::Created {
            return Err(ConfigError::AlreadyStarted);
        }

        match &self.store {
            Some(binding) => {
                info!(prefix = %binding.key_prefix, dir = %self.source_dir.display(), "watching remote store")
            }
            None => info!(dir = %self.source_dir.display(), "watching directory"),
        }

        let kv_rx = if let Some(binding) = &self.store {
            let differ = SnapshotDiffer::new(binding.store.clone(), binding.key_prefix.clone());
            let (changes_tx, changes_rx) = mpsc::channel(1);
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            self.differ_shutdown = Some(shutdown_tx);
            self.tasks.push(tokio::spawn(differ.run(
                self.config.poll_interval,
                changes_tx,
                shutdown_rx,
            )));
            Some(changes_rx)
        } else {
            None
        };

        let watch_task = self.watcher.start()?;
        self.tasks.push(watch_task);
        let intent_rx = self
            .watcher
            .take_receiver()
            .ok_or(ConfigError::AlreadyStarted)?;
        let mut pipeline = self.pipeline.take().ok_or(ConfigError::AlreadyStarted)?;

        self.scan(&mut pipeline).await;
        self.hub.publish_scan(&self.registry.snapshot());

        let mirror = self.store.as_ref().map(|binding| {
            MirrorBridge::new(
                self.source_dir.clone(),
                &binding.key_prefix,
                self.config.key_separator,
                &self.config.source_extension,
            )
        });

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.router_shutdown = Some(shutdown_tx);
        let router = Router {
            pipeline,
            registry: self.registry.clone(),
            hub: self.hub.clone(),
            mirror,
            source_dir: self.source_dir.clone(),
            extension: self.config.source_extension.clone(),
        };
        self.tasks
            .push(tokio::spawn(router.run(intent_rx, kv_rx, shutdown_rx)));

        self.phase = Phase::Started;
        Ok(())
    }

    /// Compile and register everything already in the directory. Build
    /// failures skip the unit; the scan itself always completes.
    async fn scan(&self, pipeline: &mut BuildPipeline) {
        let entries = match fs::read_dir(&self.source_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.source_dir.display(), error = %e, "cannot enumerate watched directory");
                return;
            }
        };

        let suffix = format!(".{}", self.config.source_extension);
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|file_name| file_name.strip_suffix(&suffix).map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();

        for name in names {
            info!(module = %name, "discovered");
            let path = self.source_dir.join(format!("{name}{suffix}"));
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) => {
                    warn!(module = %name, error = %e, "cannot read source, skipping");
                    continue;
                }
            };
            match pipeline.compile_and_load(&name, source).await {
                Ok(record) => {
                    self.registry.install(record);
                }
                Err(e) => warn!(module = %name, error = %e, "scan build failed, skipping module"),
            }
        }
    }

    /// Stop the poll loop and the directory watch, then wait for every
    /// background task to acknowledge — the await doubles as the done-signal
    /// for clean shutdown. Already-loaded modules stay valid to invoke; only
    /// the watch/compile machinery stops. Terminal: no further events.
    pub async fn terminate(&mut self) {
        if self.phase == Phase::Terminated {
            return;
        }

        if let Some(tx) = self.differ_shutdown.take() {
            let _ = tx.send(()).await;
        }
        self.watcher.stop();
        if let Some(tx) = self.router_shutdown.take() {
            let _ = tx.send(()).await;
        }

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                debug!(error = %e, "background task ended abnormally");
            }
        }

        self.phase = Phase::Terminated;
        info!("module manager terminated");
    }
}

/// The single event-processing path. Owns the pipeline; merges the two
/// producers with one select, which preserves per-producer ordering and
/// promises nothing across producers.
struct Router {
    pipeline: BuildPipeline,
    registry: ModuleRegistry,
    hub: Arc<SubscriptionHub>,
    mirror: Option<MirrorBridge>,
    source_dir: PathBuf,
    extension: String,
}

impl Router {
    async fn run(
        mut self,
        mut intent_rx: mpsc::Receiver<SourceIntent>,
        kv_rx: Option<mpsc::Receiver<KvChange>>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        // Without a remote leg, park the kv arm on a channel whose sender we
        // keep alive, so it never resolves.
        let (keepalive_tx, fallback_rx) = mpsc::channel(1);
        let _keepalive = keepalive_tx;
        let mut kv_rx = kv_rx.unwrap_or(fallback_rx);

        loop {
            tokio::select! {
                Some(intent) = intent_rx.recv() => self.route(intent).await,
                Some(change) = kv_rx.recv() => match &self.mirror {
                    Some(mirror) => mirror.apply(&change),
                    None => debug!(key = %change.key, "no mirror target, dropping store change"),
                },
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("router shutting down");
    }

    async fn route(&mut self, intent: SourceIntent) {
        match intent.action {
            SourceAction::Compile => {
                let path = self
                    .source_dir
                    .join(format!("{}.{}", intent.name, self.extension));
                let source = match tokio::fs::read_to_string(&path).await {
                    Ok(source) => source,
                    Err(e) => {
                        warn!(module = %intent.name, error = %e, "cannot read source, dropping notification");
                        return;
                    }
                };
                match self.pipeline.compile_and_load(&intent.name, source).await {
                    Ok(record) => {
                        let previous = self.registry.install(record.clone());
                        if previous.is_some() {
                            info!(module = %intent.name, version = record.version(), "module updated");
                            self.hub.publish_updated(&intent.name, &record);
                        } else {
                            info!(module = %intent.name, version = record.version(), "module added");
                            self.hub.publish_added(&intent.name, &record);
                        }
                    }
                    Err(e) => {
                        warn!(module = %intent.name, error = %e, "build failed, keeping previous version")
                    }
                }
            }
            SourceAction::Remove => match self.registry.remove(&intent.name) {
                Some(record) => {
                    info!(module = %intent.name, "module removed");
                    self.hub.publish_removed(&intent.name, &record);
                }
                None => debug!(module = %intent.name, "removal of unknown module ignored"),
            },
        }
    }
}
