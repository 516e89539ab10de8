//! Runner semantics exercised with scripted stages and in-memory state.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use filerelay_engine::producer::{Items, Producer};
use filerelay_engine::runner::run_pipeline;
use filerelay_engine::stage::{ConfiguredStage, Stage, StageSettings};
use filerelay_engine::{run_all, Pipeline, StageError};
use filerelay_state::{CheckpointStore, SqliteCheckpointStore};
use filerelay_types::{ItemKey, StageId, WorkItem};

fn item(name: &str, size: u64) -> WorkItem {
    let mtime: DateTime<Utc> = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    WorkItem {
        full_path: PathBuf::from("/in").join(name),
        basedir: PathBuf::from("/in"),
        name: name.to_string(),
        size,
        ctime: mtime,
        mtime,
        atime: mtime,
        processed_time: None,
    }
}

/// Producer whose item list can be swapped between runs.
#[derive(Clone, Default)]
struct FixedProducer {
    items: Arc<Mutex<Vec<WorkItem>>>,
    unavailable: bool,
}

impl FixedProducer {
    fn with(items: Vec<WorkItem>) -> Self {
        Self {
            items: Arc::new(Mutex::new(items)),
            unavailable: false,
        }
    }

    fn replace(&self, items: Vec<WorkItem>) {
        *self.items.lock().unwrap() = items;
    }
}

impl Producer for FixedProducer {
    fn produce(&self) -> Result<Items, StageError> {
        if self.unavailable {
            return Err(StageError::Remote("source offline".into()));
        }
        Ok(Box::new(self.items.lock().unwrap().clone().into_iter()))
    }

    fn summary(&self) -> String {
        "fixed".into()
    }
}

/// Shared record of what every fork of a scripted stage did.
#[derive(Default)]
struct Journal {
    runs: Mutex<Vec<String>>,
    pre_process: AtomicUsize,
    post_process: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Journal {
    fn runs(&self) -> Vec<String> {
        let mut runs = self.runs.lock().unwrap().clone();
        runs.sort();
        runs
    }

    fn clear(&self) {
        self.runs.lock().unwrap().clear();
    }
}

#[derive(Clone)]
struct Scripted {
    journal: Arc<Journal>,
    failing: Arc<Mutex<HashSet<String>>>,
    refuse_start: Arc<AtomicBool>,
    panic_on: Option<String>,
}

impl Scripted {
    fn new() -> Self {
        Self {
            journal: Arc::new(Journal::default()),
            failing: Arc::new(Mutex::new(HashSet::new())),
            refuse_start: Arc::new(AtomicBool::new(false)),
            panic_on: None,
        }
    }

    fn fail(&self, names: &[&str]) {
        let mut failing = self.failing.lock().unwrap();
        failing.clear();
        failing.extend(names.iter().map(|n| (*n).to_string()));
    }
}

impl Stage for Scripted {
    fn fork(&self) -> Box<dyn Stage> {
        Box::new(self.clone())
    }

    fn pre_process(&mut self) -> Result<(), StageError> {
        self.journal.pre_process.fetch_add(1, Ordering::SeqCst);
        if self.refuse_start.load(Ordering::SeqCst) {
            return Err(StageError::Remote("connection refused".into()));
        }
        Ok(())
    }

    fn post_process(&mut self) {
        self.journal.post_process.fetch_add(1, Ordering::SeqCst);
    }

    fn run(&mut self, item: &WorkItem) -> Result<(), StageError> {
        let active = self.journal.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal.peak.fetch_max(active, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(2));
        self.journal.active.fetch_sub(1, Ordering::SeqCst);

        self.journal.runs.lock().unwrap().push(item.name.clone());
        if self.panic_on.as_deref() == Some(item.name.as_str()) {
            panic!("scripted panic on {}", item.name);
        }
        if self.failing.lock().unwrap().contains(&item.name) {
            return Err(StageError::Remote(format!("refused {}", item.name)));
        }
        Ok(())
    }

    fn summary(&self) -> String {
        "scripted".into()
    }
}

fn configured(producer: &str, name: &str, settings: StageSettings, stage: &Scripted) -> ConfiguredStage {
    ConfiguredStage {
        id: StageId::new(producer, name),
        provider: "scripted".into(),
        description: "Scripted test stage".into(),
        settings,
        stage: Box::new(stage.clone()),
    }
}

fn pipeline(name: &str, producer: &FixedProducer, stages: Vec<ConfiguredStage>) -> Pipeline {
    Pipeline {
        name: name.into(),
        provider: "fixed".into(),
        description: "Fixed test producer".into(),
        thread: false,
        producer: Arc::new(producer.clone()),
        stages,
    }
}

fn store() -> Arc<dyn CheckpointStore> {
    Arc::new(SqliteCheckpointStore::in_memory().unwrap())
}

fn names(keys: &[ItemKey]) -> Vec<String> {
    keys.iter()
        .map(|k| k.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn settings(state: bool, depends: bool, threads: usize) -> StageSettings {
    StageSettings {
        state,
        depends,
        threads,
    }
}

#[tokio::test]
async fn second_run_over_unchanged_items_processes_nothing() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a.txt", 10)]);
    let stage = Scripted::new();
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "cp", StageSettings::default(), &stage)]);

    let first = run_pipeline(&mut p, Arc::clone(&store)).await;
    assert_eq!(names(&first.stages[0].succeeded), vec!["a.txt"]);

    stage.journal.clear();
    let second = run_pipeline(&mut p, Arc::clone(&store)).await;
    assert!(stage.journal.runs().is_empty());
    assert_eq!(second.stages[0].skipped_processed, 1);
    assert_eq!(second.stages[0].dispatched(), 0);
}

#[tokio::test]
async fn changed_size_is_processed_again() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a.txt", 10)]);
    let stage = Scripted::new();
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "cp", StageSettings::default(), &stage)]);

    run_pipeline(&mut p, Arc::clone(&store)).await;
    producer.replace(vec![item("a.txt", 11)]);
    stage.journal.clear();
    run_pipeline(&mut p, Arc::clone(&store)).await;

    assert_eq!(stage.journal.runs(), vec!["a.txt"]);
    let checkpoint = store.load(&StageId::new("inbox", "cp")).unwrap();
    assert_eq!(checkpoint.len(), 2, "old and new identity are both recorded");
}

#[tokio::test]
async fn dependent_stage_skips_previous_failures() {
    let store = store();
    let producer = FixedProducer::with(vec![item("x", 1), item("y", 1)]);
    let first = Scripted::new();
    first.fail(&["x"]);
    let second = Scripted::new();
    let mut p = pipeline(
        "inbox",
        &producer,
        vec![
            configured("inbox", "s1", settings(true, false, 1), &first),
            configured("inbox", "s2", settings(true, true, 1), &second),
        ],
    );

    let report = run_pipeline(&mut p, Arc::clone(&store)).await;

    assert_eq!(names(&report.stages[0].failed), vec!["x"]);
    assert_eq!(second.journal.runs(), vec!["y"]);
    assert_eq!(report.stages[1].skipped_dependency, 1);
}

#[tokio::test]
async fn independent_stage_ignores_previous_failures() {
    let store = store();
    let producer = FixedProducer::with(vec![item("x", 1), item("y", 1)]);
    let first = Scripted::new();
    first.fail(&["x"]);
    let second = Scripted::new();
    let mut p = pipeline(
        "inbox",
        &producer,
        vec![
            configured("inbox", "s1", settings(true, false, 1), &first),
            configured("inbox", "s2", settings(true, false, 1), &second),
        ],
    );

    run_pipeline(&mut p, store).await;
    assert_eq!(second.journal.runs(), vec!["x", "y"]);
}

#[tokio::test]
async fn failed_item_is_retried_next_run() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a", 1), item("b", 1)]);
    let stage = Scripted::new();
    stage.fail(&["b"]);
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "up", StageSettings::default(), &stage)]);

    run_pipeline(&mut p, Arc::clone(&store)).await;
    let checkpoint = store.load(&StageId::new("inbox", "up")).unwrap();
    assert!(checkpoint.contains(&item("a", 1).key()));
    assert!(!checkpoint.contains(&item("b", 1).key()));

    stage.fail(&[]);
    stage.journal.clear();
    let report = run_pipeline(&mut p, Arc::clone(&store)).await;
    assert_eq!(stage.journal.runs(), vec!["b"]);
    assert_eq!(names(&report.stages[0].succeeded), vec!["b"]);
}

#[tokio::test]
async fn stateless_stage_reprocesses_and_persists_nothing() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a", 1)]);
    let stage = Scripted::new();
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "echo", settings(false, false, 1), &stage)]);

    run_pipeline(&mut p, Arc::clone(&store)).await;
    run_pipeline(&mut p, Arc::clone(&store)).await;

    assert_eq!(stage.journal.runs(), vec!["a", "a"]);
    assert!(store.load(&StageId::new("inbox", "echo")).unwrap().is_empty());
}

#[tokio::test]
async fn pre_process_failure_fails_whole_working_set() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a", 1), item("b", 1), item("c", 1)]);
    let upload = Scripted::new();
    upload.refuse_start.store(true, Ordering::SeqCst);
    let after = Scripted::new();
    let mut p = pipeline(
        "inbox",
        &producer,
        vec![
            configured("inbox", "upload", settings(true, false, 2), &upload),
            configured("inbox", "after", settings(true, true, 1), &after),
        ],
    );

    let report = run_pipeline(&mut p, Arc::clone(&store)).await;

    let stage = &report.stages[0];
    assert!(stage.lifecycle_error.as_deref().unwrap().contains("refused"));
    assert_eq!(names(&stage.failed), vec!["a", "b", "c"]);
    assert!(upload.journal.runs().is_empty(), "run is never invoked");
    assert!(store.load(&StageId::new("inbox", "upload")).unwrap().is_empty());
    assert!(after.journal.runs().is_empty(), "dependent stage sees none of them");
    assert_eq!(report.stages[1].skipped_dependency, 3);
}

#[tokio::test]
async fn pre_process_failure_leaves_existing_checkpoint_untouched() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a", 1)]);
    let stage = Scripted::new();
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "up", StageSettings::default(), &stage)]);
    run_pipeline(&mut p, Arc::clone(&store)).await;

    producer.replace(vec![item("a", 1), item("b", 1)]);
    stage.refuse_start.store(true, Ordering::SeqCst);
    run_pipeline(&mut p, Arc::clone(&store)).await;

    let checkpoint = store.load(&StageId::new("inbox", "up")).unwrap();
    assert_eq!(checkpoint, HashSet::from([item("a", 1).key()]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn four_workers_split_successes_and_failures_exactly() {
    let store = store();
    let items: Vec<_> = (0..100).map(|i| item(&format!("f{i:03}"), 1)).collect();
    let failing: Vec<String> = (0..100).filter(|i| i % 2 == 1).map(|i| format!("f{i:03}")).collect();
    let producer = FixedProducer::with(items);
    let stage = Scripted::new();
    stage.fail(&failing.iter().map(String::as_str).collect::<Vec<_>>());
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "up", settings(true, false, 4), &stage)]);

    let report = run_pipeline(&mut p, Arc::clone(&store)).await;
    let stage_report = &report.stages[0];

    assert_eq!(names(&stage_report.failed), failing);
    assert_eq!(stage_report.succeeded.len(), 50);
    let failed: HashSet<_> = stage_report.failed.iter().collect();
    assert!(stage_report.succeeded.iter().all(|k| !failed.contains(k)));

    let checkpoint = store.load(&StageId::new("inbox", "up")).unwrap();
    let succeeded: HashSet<_> = stage_report.succeeded.iter().cloned().collect();
    assert_eq!(checkpoint, succeeded);

    assert_eq!(stage.journal.runs().len(), 100, "every item dispatched once");
    assert_eq!(stage.journal.pre_process.load(Ordering::SeqCst), 4);
    assert_eq!(stage.journal.post_process.load(Ordering::SeqCst), 4);
    assert!(stage.journal.peak.load(Ordering::SeqCst) > 1, "workers overlap");
}

#[tokio::test]
async fn worker_count_never_exceeds_working_set() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a", 1), item("b", 1)]);
    let stage = Scripted::new();
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "up", settings(true, false, 8), &stage)]);

    run_pipeline(&mut p, store).await;
    assert_eq!(stage.journal.pre_process.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn empty_working_set_skips_lifecycle_hooks() {
    let store = store();
    let producer = FixedProducer::with(Vec::new());
    let stage = Scripted::new();
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "up", StageSettings::default(), &stage)]);

    let report = run_pipeline(&mut p, store).await;
    assert_eq!(report.discovered, 0);
    assert_eq!(stage.journal.pre_process.load(Ordering::SeqCst), 0);
    assert_eq!(stage.journal.post_process.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_item_is_failed_and_others_continue() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a", 1), item("boom", 1), item("c", 1)]);
    let mut stage = Scripted::new();
    stage.panic_on = Some("boom".into());
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "up", StageSettings::default(), &stage)]);

    let report = run_pipeline(&mut p, store).await;
    assert_eq!(names(&report.stages[0].failed), vec!["boom"]);
    assert_eq!(names(&report.stages[0].succeeded), vec!["a", "c"]);
}

#[tokio::test]
async fn discovery_failure_yields_empty_run() {
    let store = store();
    let producer = FixedProducer {
        unavailable: true,
        ..FixedProducer::default()
    };
    let stage = Scripted::new();
    let mut p = pipeline("inbox", &producer, vec![configured("inbox", "up", StageSettings::default(), &stage)]);

    let report = run_pipeline(&mut p, store).await;
    assert!(report.discovery_error.as_deref().unwrap().contains("offline"));
    assert_eq!(report.stages[0].candidates, 0);
    assert!(stage.journal.runs().is_empty());
}

#[tokio::test]
async fn terminal_stage_completions_are_stamped() {
    let store = store();
    let producer = FixedProducer::with(vec![item("a", 1), item("b", 1)]);
    let first = Scripted::new();
    let last = Scripted::new();
    last.fail(&["b"]);
    let mut p = pipeline(
        "inbox",
        &producer,
        vec![
            configured("inbox", "s1", StageSettings::default(), &first),
            configured("inbox", "s2", StageSettings::default(), &last),
        ],
    );

    let report = run_pipeline(&mut p, store).await;
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].name, "a");
    assert!(report.completed[0].processed_time.is_some());
}

#[tokio::test]
async fn run_all_reports_in_configuration_order() {
    let store = store();
    let mut pipelines = Vec::new();
    let stages: Vec<_> = (0..3).map(|_| Scripted::new()).collect();
    for (i, stage) in stages.iter().enumerate() {
        let name = format!("p{i}");
        let producer = FixedProducer::with(vec![item(&format!("{name}.txt"), 1)]);
        let mut p = pipeline(&name, &producer, vec![configured(&name, "up", StageSettings::default(), stage)]);
        p.thread = i != 1;
        pipelines.push(p);
    }

    let report = run_all(pipelines, store).await;

    let order: Vec<_> = report.pipelines.iter().map(|p| p.producer.as_str()).collect();
    assert_eq!(order, vec!["p0", "p1", "p2"]);
    assert!(!report.has_failures());
    for stage in &stages {
        assert_eq!(stage.journal.runs().len(), 1);
    }
}
