//! Directory change adapter
//!
//! Subscribes to native filesystem notifications on one directory
//! (non-recursive), filters them down to recognized compile units, and maps
//! each to a logical `(module name, action)` intent. Whether a compile intent
//! becomes an add or an update is decided downstream, by registry presence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What a filesystem notification asks the orchestrator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    /// (Re)compile the module; add-vs-update is resolved downstream.
    Compile,
    /// Drop the module. Removing an unknown module is a tolerated no-op.
    Remove,
}

/// One translated notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIntent {
    pub name: String,
    pub action: SourceAction,
}

/// Watches one directory for compile-unit changes.
pub(crate) struct SourceWatcher {
    dir: PathBuf,
    extension: String,
    debounce: Duration,
    watcher: Option<RecommendedWatcher>,
    intent_tx: mpsc::Sender<SourceIntent>,
    intent_rx: Option<mpsc::Receiver<SourceIntent>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SourceWatcher {
    pub(crate) fn new(dir: PathBuf, extension: &str, debounce: Duration) -> Self {
        // Capacity 1: a single pending intent at a time, so a slow consumer
        // back-pressures translation rather than racing ahead of it.
        let (intent_tx, intent_rx) = mpsc::channel(1);
        Self {
            dir,
            extension: extension.to_string(),
            debounce,
            watcher: None,
            intent_tx,
            intent_rx: Some(intent_rx),
            shutdown_tx: None,
        }
    }

    /// Take the intent receiver (once).
    pub(crate) fn take_receiver(&mut self) -> Option<mpsc::Receiver<SourceIntent>> {
        self.intent_rx.take()
    }

    /// Start the native watch and the translation task.
    pub(crate) fn start(&mut self) -> Result<JoinHandle<()>, notify::Error> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Event>(1024);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = raw_tx.blocking_send(event);
                }
                Err(e) => warn!(error = %e, "watch backend error"),
            },
            NotifyConfig::default(),
        )?;
        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;
        self.watcher = Some(watcher);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let intent_tx = self.intent_tx.clone();
        let extension = self.extension.clone();
        let debounce = self.debounce;

        let handle = tokio::spawn(async move {
            let mut last_compile: HashMap<PathBuf, Instant> = HashMap::new();

            loop {
                tokio::select! {
                    Some(event) = raw_rx.recv() => {
                        for intent in
                            translate(&event, &extension, debounce, &mut last_compile)
                        {
                            if intent_tx.send(intent).await.is_err() {
                                debug!("intent consumer gone, stopping watch translation");
                                return;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("watch translation shutting down");
                        return;
                    }
                }
            }
        });
        Ok(handle)
    }

    /// Close the native watch (unblocks its backend immediately) and stop
    /// the translation task.
    pub(crate) fn stop(&mut self) {
        self.watcher = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// Map one native event onto zero or more intents.
///
/// Only write bursts are debounced; removals always pass and clear the
/// debounce slate for their path, so a quick delete-recreate never loses the
/// recreate.
fn translate(
    event: &Event,
    extension: &str,
    debounce: Duration,
    last_compile: &mut HashMap<PathBuf, Instant>,
) -> Vec<SourceIntent> {
    let mut intents = Vec::new();

    for path in &event.paths {
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!(path = %path.display(), "undecodable file name, dropping notification");
            continue;
        };

        let Some(action) = classify(&event.kind, path) else {
            continue;
        };

        match action {
            SourceAction::Compile => {
                // Only regular files count as compile units.
                match std::fs::symlink_metadata(path) {
                    Ok(metadata) if metadata.is_file() => {}
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot stat notified path, dropping notification");
                        continue;
                    }
                }
                let now = Instant::now();
                if let Some(last) = last_compile.get(path) {
                    if now.duration_since(*last) < debounce {
                        debug!(path = %path.display(), "debounced write");
                        continue;
                    }
                }
                last_compile.insert(path.clone(), now);
            }
            SourceAction::Remove => {
                last_compile.remove(path);
            }
        }

        intents.push(SourceIntent {
            name: name.to_string(),
            action,
        });
    }

    intents
}

fn classify(kind: &EventKind, path: &Path) -> Option<SourceAction> {
    match kind {
        EventKind::Create(_) => Some(SourceAction::Compile),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            Some(SourceAction::Compile)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(SourceAction::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(SourceAction::Compile),
        // Single-shot rename notification: direction comes from whether the
        // path is still there.
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.exists() {
                Some(SourceAction::Compile)
            } else {
                Some(SourceAction::Remove)
            }
        }
        EventKind::Remove(_) => Some(SourceAction::Remove),
        _ => None,
    }
}
