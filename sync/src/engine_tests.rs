//! End-to-end scenarios driven through the engine facade

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use crate::config::{ConfigStore, GeneralOptions, SyncConfig, SynchroMapping, TargetMappingGroup};
use crate::engine::Engine;
use crate::error::{Result, SyncError};
use crate::events::RunEvent;
use crate::host::{HostBridge, NoopHost};
use crate::run::{RunId, RunStatus, Trigger};

#[derive(Default)]
struct RecordingHost {
    saves: AtomicUsize,
    refreshes: AtomicUsize,
}

impl HostBridge for RecordingHost {
    fn save_all_open_documents(&self) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn refresh_filesystem_view(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Project {
    dir: TempDir,
}

impl Project {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }
}

fn config_with(general: GeneralOptions, groups: Vec<TargetMappingGroup>) -> ConfigStore {
    ConfigStore::new(SyncConfig {
        general,
        target_mappings: groups,
        ..Default::default()
    })
}

fn single_mapping(source: &Path, target: &Path) -> Vec<TargetMappingGroup> {
    vec![TargetMappingGroup::new("web").with_mapping(SynchroMapping::new(source, target))]
}

#[tokio::test]
async fn test_changed_file_is_mirrored_with_identical_bytes() {
    let project = Project::new();
    let class = project.write("proj/out/a.class", "\u{00ca}\u{00fe}bytecode");
    let store = config_with(
        GeneralOptions::default(),
        single_mapping(&project.path("proj/out"), &project.path("remote/app")),
    );
    let (engine, _events) = Engine::new(store, Arc::new(NoopHost));

    let handle = engine.launch(vec![class.clone()], Trigger::Manual).handle().unwrap();
    assert_eq!(handle.wait().await, RunStatus::Completed);

    let copied = fs::read(project.path("remote/app/a.class")).unwrap();
    assert_eq!(copied, fs::read(&class).unwrap());
    assert_eq!(handle.summary().copied, 1);
    assert!(!engine.has_running_synchro());
}

#[tokio::test]
async fn test_later_mapping_wins_on_shared_target() {
    let project = Project::new();
    project.write("first/conf.xml", "first");
    project.write("second/conf.xml", "second");
    let target = project.path("remote");
    let group = TargetMappingGroup::new("web")
        .with_mapping(SynchroMapping::new(project.path("first"), &target))
        .with_mapping(SynchroMapping::new(project.path("second"), &target));
    let store = config_with(GeneralOptions::default(), vec![group]);
    let (engine, _events) = Engine::new(store, Arc::new(NoopHost));

    let handle = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();
    assert_eq!(handle.wait().await, RunStatus::Completed);

    assert_eq!(handle.summary().copied, 2);
    assert_eq!(fs::read_to_string(target.join("conf.xml")).unwrap(), "second");
}

#[tokio::test]
async fn test_second_launch_rejected_while_first_active() {
    let project = Project::new();
    project.write("out/a.class", "a");
    let store = config_with(
        GeneralOptions::default(),
        single_mapping(&project.path("out"), &project.path("remote")),
    );
    let (engine, _events) = Engine::new(store, Arc::new(NoopHost));

    let first = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();
    // The first run has not been polled yet, so it is still pending
    assert!(engine.has_running_synchro());
    assert!(!engine.can_launch());

    let second = engine.launch(Vec::new(), Trigger::Manual);
    assert!(second.is_rejected());
    assert_eq!(engine.consoles().len(), 1);

    assert_eq!(first.wait().await, RunStatus::Completed);
    assert!(engine.can_launch());
}

#[tokio::test]
async fn test_concurrent_runs_are_independent() {
    let project = Project::new();
    for i in 0..4 {
        project.write(&format!("out/f{}.class", i), "x");
    }
    let general = GeneralOptions {
        allow_concurrent_runs: true,
        ..Default::default()
    };
    let store = config_with(general, single_mapping(&project.path("out"), &project.path("remote")));
    let (engine, _events) = Engine::new(store, Arc::new(NoopHost));

    let handles: Vec<_> = (0..3)
        .map(|_| engine.launch(Vec::new(), Trigger::Manual).handle().unwrap())
        .collect();
    assert_eq!(engine.consoles().len(), 3);

    engine.stop(handles[1].id()).unwrap();

    assert_eq!(handles[0].wait().await, RunStatus::Completed);
    assert_eq!(handles[1].wait().await, RunStatus::Stopped);
    assert_eq!(handles[2].wait().await, RunStatus::Completed);

    assert_eq!(handles[0].summary().copied, 4);
    assert_eq!(handles[1].summary().copied, 0);
    assert_eq!(handles[2].summary().copied, 4);

    let ids: Vec<RunId> = engine.consoles().iter().map(|sink| sink.run_id()).collect();
    assert_eq!(ids, handles.iter().map(|h| h.id()).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupt_mid_run_stops_cleanly() {
    let project = Project::new();
    let total = 300;
    for i in 0..total {
        project.write(&format!("out/f{:03}.class", i), &"x".repeat(4096));
    }
    let remote = project.path("remote");
    let store = config_with(GeneralOptions::default(), single_mapping(&project.path("out"), &remote));
    let (engine, _events) = Engine::new(store, Arc::new(NoopHost));

    let handle = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();
    while handle.summary().copied == 0 && !handle.status().is_terminal() {
        tokio::task::yield_now().await;
    }
    engine.interrupt(handle.id()).unwrap();

    assert_eq!(handle.wait().await, RunStatus::Stopped);

    let summary = handle.summary();
    assert!(summary.copied > 0);
    assert!(summary.skipped > 0);
    assert_eq!(summary.copied + summary.skipped + summary.failed, total);

    let entries: Vec<String> = fs::read_dir(&remote)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().all(|name| !name.ends_with(".sync-part")));
    assert_eq!(entries.len(), summary.copied);
    for name in &entries {
        assert_eq!(fs::read(remote.join(name)).unwrap().len(), 4096);
    }

    let texts: Vec<String> = handle.console().lines().into_iter().map(|l| l.text).collect();
    assert!(texts
        .iter()
        .any(|t| t == &format!("Interrupt requested, skipping {} remaining task(s)", summary.skipped)));
}

#[tokio::test]
async fn test_console_actions_publish_events() {
    let (engine, mut events) = Engine::new(config_with(GeneralOptions::default(), Vec::new()), Arc::new(NoopHost));

    let handle = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();
    handle.wait().await;
    engine.clear_console(handle.id()).unwrap();
    engine.remove_console(handle.id()).unwrap();

    let mut cleared = false;
    let mut removed = false;
    while let Some(event) = events.try_recv() {
        match event {
            RunEvent::ConsoleCleared { run_id } => cleared = run_id == handle.id(),
            RunEvent::ConsoleRemoved { run_id } => removed = run_id == handle.id(),
            _ => {}
        }
    }
    assert!(cleared);
    assert!(removed);
}

#[tokio::test]
async fn test_compile_trigger_uses_compile_groups_only() {
    let project = Project::new();
    project.write("classes/a.class", "a");
    project.write("web/index.html", "<html/>");
    let mut compiled = TargetMappingGroup::new("classes")
        .with_mapping(SynchroMapping::new(project.path("classes"), project.path("remote/classes")));
    compiled.execute_on_compile = true;
    let resources = TargetMappingGroup::new("resources")
        .with_mapping(SynchroMapping::new(project.path("web"), project.path("remote/web")));
    let store = config_with(GeneralOptions::default(), vec![compiled, resources]);
    let (engine, _events) = Engine::new(store, Arc::new(NoopHost));

    let handle = engine
        .launch(vec![project.path("classes")], Trigger::CompileFinished)
        .handle()
        .unwrap();
    assert_eq!(handle.wait().await, RunStatus::Completed);

    assert!(project.path("remote/classes/a.class").exists());
    assert!(!project.path("remote/web/index.html").exists());
}

#[tokio::test]
async fn test_rerun_last_reads_current_configuration() {
    let project = Project::new();
    project.write("out/a.class", "a");
    let store = config_with(
        GeneralOptions::default(),
        single_mapping(&project.path("out"), &project.path("first")),
    );
    let (engine, _events) = Engine::new(store.clone(), Arc::new(NoopHost));

    assert!(engine.rerun_last().is_none());

    let handle = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();
    handle.wait().await;

    let second_target = project.path("second");
    store
        .update(|config| config.target_mappings[0].mappings[0].target_path = second_target.clone())
        .unwrap();

    let rerun = engine.rerun_last().unwrap().handle().unwrap();
    assert_eq!(rerun.wait().await, RunStatus::Completed);
    assert!(second_target.join("a.class").exists());
    assert_ne!(rerun.id(), handle.id());
}

#[tokio::test]
async fn test_unknown_run_is_an_error() {
    let (engine, _events) = Engine::new(ConfigStore::default(), Arc::new(NoopHost));
    let id = RunId::new();

    assert!(matches!(engine.stop(id), Err(SyncError::UnknownRun(missing)) if missing == id));
    assert!(matches!(engine.interrupt(id), Err(SyncError::UnknownRun(_))));
    assert!(matches!(engine.clear_console(id), Err(SyncError::UnknownRun(_))));
    assert!(matches!(engine.remove_console(id), Err(SyncError::UnknownRun(_))));
}

#[tokio::test]
async fn test_finished_run_evicted_when_console_removed() {
    let project = Project::new();
    project.write("out/a.class", "a");
    let store = config_with(
        GeneralOptions::default(),
        single_mapping(&project.path("out"), &project.path("remote")),
    );
    let (engine, _events) = Engine::new(store, Arc::new(NoopHost));

    let handle = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();
    handle.wait().await;
    assert_eq!(engine.runs().len(), 1);

    engine.remove_console(handle.id()).unwrap();

    assert!(engine.runs().is_empty());
    assert!(engine.run(handle.id()).is_none());
    assert!(engine.console(handle.id()).is_none());
    // The caller's handle keeps the final state
    assert_eq!(handle.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_console_removed_mid_run_evicts_on_completion() {
    let project = Project::new();
    project.write("out/a.class", "a");
    let store = config_with(
        GeneralOptions::default(),
        single_mapping(&project.path("out"), &project.path("remote")),
    );
    let (engine, _events) = Engine::new(store, Arc::new(NoopHost));

    let handle = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();
    engine.remove_console(handle.id()).unwrap();
    assert!(engine.consoles().is_empty());
    assert_eq!(engine.runs().len(), 1);

    handle.wait().await;
    // Joins the run task, after which eviction has happened
    engine.shutdown().await;

    assert!(engine.runs().is_empty());
}

#[tokio::test]
async fn test_host_hooks_on_launch() {
    let project = Project::new();
    let source = project.write("src/com/acme/App.java", "class App {}");
    project.write("out/App.class", "c");
    let general = GeneralOptions {
        allow_concurrent_runs: true,
        ..Default::default()
    };
    let store = ConfigStore::new(SyncConfig {
        general,
        source_roots: vec![project.path("src")],
        target_mappings: single_mapping(&project.path("out"), &project.path("remote")),
        ..Default::default()
    });
    let host = Arc::new(RecordingHost::default());
    let (engine, _events) = Engine::new(store, host.clone());

    let first = engine.launch(vec![source.clone()], Trigger::Manual).handle().unwrap();
    // Not idle any more, so no second refresh
    let second = engine.launch(vec![source], Trigger::Manual).handle().unwrap();
    first.wait().await;
    second.wait().await;

    assert_eq!(host.saves.load(Ordering::SeqCst), 2);
    assert_eq!(host.refreshes.load(Ordering::SeqCst), 1);

    // Output files are not sources
    let third = engine
        .launch(vec![project.path("out/App.class")], Trigger::Manual)
        .handle()
        .unwrap();
    third.wait().await;
    assert_eq!(host.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_save_disabled_skips_host() {
    let general = GeneralOptions {
        save_before_copy: false,
        ..Default::default()
    };
    let host = Arc::new(RecordingHost::default());
    let (engine, _events) = Engine::new(config_with(general, Vec::new()), host.clone());

    let handle = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();
    assert_eq!(handle.wait().await, RunStatus::Completed);

    assert_eq!(host.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_events_follow_run_lifecycle() {
    let project = Project::new();
    project.write("out/a.class", "a");
    let store = config_with(
        GeneralOptions::default(),
        single_mapping(&project.path("out"), &project.path("remote")),
    );
    let (engine, mut events) = Engine::new(store, Arc::new(NoopHost));

    let handle = engine.launch(Vec::new(), Trigger::Manual).handle().unwrap();

    let mut saw_started = false;
    loop {
        match events.recv().await.unwrap() {
            RunEvent::RunStarted { run_id, total_tasks, .. } => {
                assert_eq!(run_id, handle.id());
                assert_eq!(total_tasks, 1);
                saw_started = true;
            }
            RunEvent::RunFinished { status, summary, .. } => {
                assert_eq!(status, RunStatus::Completed);
                assert_eq!(summary.copied, 1);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_started);
}
