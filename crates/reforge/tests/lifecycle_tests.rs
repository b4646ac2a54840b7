//! End-to-end lifecycle tests against a real compiler and a real watched
//! directory: scan at start, add/update/remove routing, build-failure
//! tolerance, terminal silence after terminate.

use std::sync::Arc;
use std::time::Duration;

use libloading::Symbol;
use reforge::{ManagerConfig, ModuleManager, ModuleRecord, ModuleSet};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Compiles can take a while on a cold machine; be generous.
const EVENT: Duration = Duration::from_secs(60);
/// Long enough to clear the test debounce window and let the filesystem
/// settle between steps.
const SETTLE: Duration = Duration::from_millis(600);

const ADD_SRC: &str =
    "#[no_mangle]\npub extern \"C\" fn add(a: i32, b: i32) -> i32 { a + b }\n";
const SUB_SRC: &str =
    "#[no_mangle]\npub extern \"C\" fn sub(a: i32, b: i32) -> i32 { a - b }\n";
const MUL_SRC: &str =
    "#[no_mangle]\npub extern \"C\" fn combine(a: i32, b: i32) -> i32 { a * b }\n";
const MUL_PLUS_ONE_SRC: &str =
    "#[no_mangle]\npub extern \"C\" fn combine(a: i32, b: i32) -> i32 { a * b + 1 }\n";
const BROKEN_SRC: &str = "pub fn combine(a: i32, { nope\n";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("reforge=debug")
        .try_init();
}

fn test_config() -> ManagerConfig {
    ManagerConfig::default().with_debounce(Duration::from_millis(200))
}

fn invoke2(record: &Arc<ModuleRecord>, symbol: &[u8], a: i32, b: i32) -> i32 {
    let f: Symbol<unsafe extern "C" fn(i32, i32) -> i32> =
        unsafe { record.symbol(symbol) }.expect("symbol lookup");
    unsafe { f(a, b) }
}

type ModuleEvent = (String, Arc<ModuleRecord>);

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ModuleEvent>) -> ModuleEvent {
    timeout(EVENT, rx.recv())
        .await
        .expect("timed out waiting for module event")
        .expect("event channel closed")
}

fn capture_module_events(
    manager: &ModuleManager,
) -> (
    mpsc::UnboundedReceiver<ModuleEvent>,
    mpsc::UnboundedReceiver<ModuleEvent>,
    mpsc::UnboundedReceiver<ModuleEvent>,
) {
    let (add_tx, add_rx) = mpsc::unbounded_channel();
    manager.on_add(move |name, record| {
        let _ = add_tx.send((name.to_string(), record.clone()));
    });
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    manager.on_update(move |name, record| {
        let _ = update_tx.send((name.to_string(), record.clone()));
    });
    let (remove_tx, remove_rx) = mpsc::unbounded_channel();
    manager.on_remove(move |name, record| {
        let _ = remove_tx.send((name.to_string(), record.clone()));
    });
    (add_rx, update_rx, remove_rx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scan_of_empty_directory_reports_empty_set() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut manager = ModuleManager::watch_dir(dir.path(), test_config()).unwrap();

    let (scan_tx, mut scan_rx) = mpsc::unbounded_channel::<usize>();
    manager.on_scan(move |modules| {
        let _ = scan_tx.send(modules.len());
    });

    manager.start().await.unwrap();
    assert_eq!(scan_rx.recv().await.unwrap(), 0);
    assert!(manager.module_names().is_empty());

    manager.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scan_loads_preexisting_modules() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("alpha.rs"), ADD_SRC).unwrap();
    std::fs::write(dir.path().join("beta.rs"), SUB_SRC).unwrap();
    std::fs::write(dir.path().join("ignore.txt"), "not a compile unit").unwrap();

    let mut manager = ModuleManager::watch_dir(dir.path(), test_config()).unwrap();
    let (scan_tx, mut scan_rx) = mpsc::unbounded_channel::<ModuleSet>();
    manager.on_scan(move |modules| {
        let _ = scan_tx.send(modules.clone());
    });

    manager.start().await.unwrap();

    let modules = scan_rx.recv().await.unwrap();
    let mut names: Vec<&str> = modules.keys().map(String::as_str).collect();
    names.sort();
    assert_eq!(names, vec!["alpha", "beta"]);

    assert_eq!(invoke2(&modules["alpha"], b"add", 1, 2), 3);
    assert_eq!(invoke2(&modules["beta"], b"sub", 1, 2), -1);
    assert_eq!(modules["alpha"].source(), ADD_SRC);
    assert_eq!(manager.module_names(), vec!["alpha", "beta"]);

    manager.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn module_lifecycle_fires_add_update_remove() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut manager = ModuleManager::watch_dir(dir.path(), test_config()).unwrap();
    let (mut add_rx, mut update_rx, mut remove_rx) = capture_module_events(&manager);

    manager.start().await.unwrap();

    // create -> add
    std::fs::write(dir.path().join("gamma.rs"), MUL_SRC).unwrap();
    let (name, added) = next_event(&mut add_rx).await;
    assert_eq!(name, "gamma");
    assert_eq!(added.version(), 0);
    assert_eq!(invoke2(&added, b"combine", 3, 2), 6);
    assert!(manager.module("gamma").is_some());

    // overwrite -> update, carrying a handle built from the new source
    tokio::time::sleep(SETTLE).await;
    std::fs::write(dir.path().join("gamma.rs"), MUL_PLUS_ONE_SRC).unwrap();
    let (name, updated) = next_event(&mut update_rx).await;
    assert_eq!(name, "gamma");
    assert_eq!(updated.version(), 1);
    assert_eq!(invoke2(&updated, b"combine", 3, 2), 7);
    assert_ne!(updated.source_hash(), added.source_hash());

    // the superseded handle keeps working for whoever still holds it
    assert_eq!(invoke2(&added, b"combine", 3, 2), 6);

    // delete -> remove, carrying the last known record
    tokio::time::sleep(SETTLE).await;
    std::fs::remove_file(dir.path().join("gamma.rs")).unwrap();
    let (name, removed) = next_event(&mut remove_rx).await;
    assert_eq!(name, "gamma");
    assert_eq!(removed.version(), 1);
    assert!(manager.module("gamma").is_none());

    // exactly one event each
    assert!(add_rx.try_recv().is_err());
    assert!(update_rx.try_recv().is_err());
    assert!(remove_rx.try_recv().is_err());

    manager.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broken_build_keeps_previous_version_live() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("stable.rs"), MUL_SRC).unwrap();

    let mut manager = ModuleManager::watch_dir(dir.path(), test_config()).unwrap();
    let (mut add_rx, mut update_rx, _remove_rx) = capture_module_events(&manager);

    manager.start().await.unwrap();
    let before = manager.module("stable").expect("scan loaded stable");
    assert_eq!(before.version(), 0);

    // break the module, then add a second module whose add event tells us the
    // broken compile attempt has been fully processed (per-producer FIFO)
    tokio::time::sleep(SETTLE).await;
    std::fs::write(dir.path().join("stable.rs"), BROKEN_SRC).unwrap();
    tokio::time::sleep(SETTLE).await;
    std::fs::write(dir.path().join("signal.rs"), ADD_SRC).unwrap();

    let (name, _) = next_event(&mut add_rx).await;
    assert_eq!(name, "signal");

    // no update fired for the broken build and the old version still serves
    assert!(update_rx.try_recv().is_err());
    let still = manager.module("stable").expect("previous record current");
    assert_eq!(still.version(), 0);
    assert_eq!(invoke2(&still, b"combine", 3, 2), 6);

    manager.terminate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminate_is_terminal_and_silent() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut manager = ModuleManager::watch_dir(dir.path(), test_config()).unwrap();
    let (mut add_rx, _update_rx, _remove_rx) = capture_module_events(&manager);

    manager.start().await.unwrap();
    manager.terminate().await;

    std::fs::write(dir.path().join("late.rs"), ADD_SRC).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(add_rx.try_recv().is_err());
    assert!(manager.module("late").is_none());
}
