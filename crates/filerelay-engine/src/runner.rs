//! Stage-sequence runner.
//!
//! One call to [`run_pipeline`] is one run of one producer: discover once,
//! then for every stage in order restore its checkpoint, compute the working
//! set, drain it through a bounded worker pool and persist the result. Stage
//! `n + 1` never starts before stage `n` has persisted its checkpoint.

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use filerelay_state::CheckpointStore;
use filerelay_types::{ItemKey, StageId, WorkItem};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::StageError;
use crate::orchestrator::Pipeline;
use crate::producer::Producer;
use crate::result::{PipelineReport, StageReport};
use crate::stage::{ConfiguredStage, Stage};

/// Items a stage will dispatch, plus what was filtered out and why.
#[derive(Debug, Default)]
pub struct WorkingSet {
    pub items: Vec<WorkItem>,
    pub skipped_processed: usize,
    pub skipped_dependency: usize,
}

/// Filter `candidates` by the stage checkpoint and, when the stage depends on
/// its predecessor, by the predecessor's failures in this run.
#[must_use]
pub fn select_working_set(
    candidates: &[WorkItem],
    processed: Option<&HashSet<ItemKey>>,
    previous_failed: Option<&HashSet<ItemKey>>,
) -> WorkingSet {
    let mut selection = WorkingSet::default();
    for item in candidates {
        let key = item.key();
        if processed.is_some_and(|set| set.contains(&key)) {
            selection.skipped_processed += 1;
        } else if previous_failed.is_some_and(|set| set.contains(&key)) {
            selection.skipped_dependency += 1;
        } else {
            selection.items.push(item.clone());
        }
    }
    selection
}

/// Run every stage of `pipeline` once.
///
/// Never fails: discovery, checkpoint and item errors are logged and
/// reflected in the returned report.
pub async fn run_pipeline(
    pipeline: &mut Pipeline,
    store: Arc<dyn CheckpointStore>,
) -> PipelineReport {
    let started = Instant::now();
    let (candidates, discovery_error) = discover(&pipeline.name, Arc::clone(&pipeline.producer)).await;
    tracing::info!(
        producer = %pipeline.name,
        items = candidates.len(),
        "discovery finished"
    );

    let terminal = pipeline.stages.len().checked_sub(1);
    let mut stages = Vec::with_capacity(pipeline.stages.len());
    let mut completed = Vec::new();
    let mut previous_failed: Option<HashSet<ItemKey>> = None;

    for (index, stage) in pipeline.stages.iter_mut().enumerate() {
        let run = run_stage(stage, &candidates, previous_failed.as_ref(), &store).await;
        if Some(index) == terminal {
            completed = run.succeeded;
            for item in &mut completed {
                item.mark_processed();
            }
        }
        previous_failed = Some(run.failed);
        stages.push(run.report);
    }

    let report = PipelineReport {
        producer: pipeline.name.clone(),
        discovered: candidates.len(),
        discovery_error,
        stages,
        completed,
        duration: started.elapsed(),
    };
    tracing::info!(
        producer = %report.producer,
        completed = report.completed.len(),
        failed = report.failed(),
        duration_secs = report.duration.as_secs_f64(),
        "pipeline finished"
    );
    report
}

async fn discover(
    producer_name: &str,
    producer: Arc<dyn Producer>,
) -> (Vec<WorkItem>, Option<String>) {
    let joined =
        tokio::task::spawn_blocking(move || producer.produce().map(Iterator::collect::<Vec<_>>))
            .await;
    match joined {
        Ok(Ok(items)) => (items, None),
        Ok(Err(e)) => {
            tracing::error!(producer = %producer_name, error = %e, "discovery failed");
            (Vec::new(), Some(e.to_string()))
        }
        Err(join_err) => {
            tracing::error!(producer = %producer_name, error = %join_err, "discovery panicked");
            (Vec::new(), Some(format!("discovery panicked: {join_err}")))
        }
    }
}

struct StageRun {
    report: StageReport,
    succeeded: Vec<WorkItem>,
    failed: HashSet<ItemKey>,
}

async fn run_stage(
    stage: &mut ConfiguredStage,
    candidates: &[WorkItem],
    previous_failed: Option<&HashSet<ItemKey>>,
    store: &Arc<dyn CheckpointStore>,
) -> StageRun {
    let started = Instant::now();
    let id = stage.id.clone();
    let settings = stage.settings;

    let checkpoint = if settings.state {
        Some(load_checkpoint(store, &id).await)
    } else {
        None
    };
    let previous_failed = previous_failed.filter(|_| settings.depends);
    let selection = select_working_set(candidates, checkpoint.as_ref(), previous_failed);
    tracing::info!(
        stage = %id,
        candidates = candidates.len(),
        working = selection.items.len(),
        skipped_processed = selection.skipped_processed,
        skipped_dependency = selection.skipped_dependency,
        threads = settings.threads,
        "stage starting"
    );

    let outcome = dispatch(stage, selection.items, settings.threads).await;

    if let (Some(mut keys), None) = (checkpoint, &outcome.lifecycle_error) {
        keys.extend(outcome.succeeded.iter().map(WorkItem::key));
        save_checkpoint(store, &id, keys).await;
    }

    let mut succeeded: Vec<ItemKey> = outcome.succeeded.iter().map(WorkItem::key).collect();
    let mut failed: Vec<ItemKey> = outcome.failed.iter().map(WorkItem::key).collect();
    succeeded.sort();
    failed.sort();

    let report = StageReport {
        id,
        candidates: candidates.len(),
        skipped_processed: selection.skipped_processed,
        skipped_dependency: selection.skipped_dependency,
        succeeded,
        failed,
        lifecycle_error: outcome.lifecycle_error,
        duration: started.elapsed(),
    };
    tracing::info!(
        stage = %report.id,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        duration_secs = report.duration.as_secs_f64(),
        "stage finished"
    );

    StageRun {
        failed: report.failed.iter().cloned().collect(),
        succeeded: outcome.succeeded,
        report,
    }
}

async fn load_checkpoint(store: &Arc<dyn CheckpointStore>, id: &StageId) -> HashSet<ItemKey> {
    let task_store = Arc::clone(store);
    let task_id = id.clone();
    match tokio::task::spawn_blocking(move || task_store.load(&task_id)).await {
        Ok(Ok(keys)) => keys,
        Ok(Err(e)) => {
            tracing::warn!(stage = %id, error = %e, "checkpoint unreadable, starting empty");
            HashSet::new()
        }
        Err(join_err) => {
            tracing::warn!(stage = %id, error = %join_err, "checkpoint load aborted, starting empty");
            HashSet::new()
        }
    }
}

async fn save_checkpoint(store: &Arc<dyn CheckpointStore>, id: &StageId, keys: HashSet<ItemKey>) {
    let task_store = Arc::clone(store);
    let task_id = id.clone();
    match tokio::task::spawn_blocking(move || task_store.save(&task_id, &keys)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(stage = %id, error = %e, "checkpoint not saved"),
        Err(join_err) => tracing::error!(stage = %id, error = %join_err, "checkpoint save aborted"),
    }
}

#[derive(Default)]
struct Dispatch {
    succeeded: Vec<WorkItem>,
    failed: Vec<WorkItem>,
    lifecycle_error: Option<String>,
}

type Outcome = (WorkItem, Result<(), StageError>);

/// Fork `min(threads, |working|)` workers, start them all, then let them
/// drain a shared queue. Outcomes flow back over a channel to this task,
/// which is the only place the success and failure sets are built.
async fn dispatch(stage: &mut ConfiguredStage, working: Vec<WorkItem>, threads: usize) -> Dispatch {
    if working.is_empty() {
        return Dispatch::default();
    }
    let id = stage.id.clone();
    let worker_count = threads.clamp(1, working.len());

    let mut starting = JoinSet::new();
    for _ in 0..worker_count {
        let mut fork = stage.stage.fork();
        starting.spawn_blocking(move || {
            let started = fork.pre_process();
            (fork, started)
        });
    }

    let mut ready = Vec::with_capacity(worker_count);
    let mut lifecycle_error = None;
    while let Some(joined) = starting.join_next().await {
        match joined {
            Ok((fork, Ok(()))) => ready.push(fork),
            Ok((_, Err(e))) => {
                tracing::error!(stage = %id, error = %e, "pre_process failed");
                lifecycle_error.get_or_insert_with(|| e.to_string());
            }
            Err(join_err) => {
                tracing::error!(stage = %id, error = %join_err, "pre_process panicked");
                lifecycle_error.get_or_insert_with(|| format!("pre_process panicked: {join_err}"));
            }
        }
    }

    if let Some(error) = lifecycle_error {
        if !ready.is_empty() {
            let stopped = tokio::task::spawn_blocking(move || {
                for mut fork in ready {
                    fork.post_process();
                }
            })
            .await;
            if let Err(join_err) = stopped {
                tracing::warn!(stage = %id, error = %join_err, "post_process panicked");
            }
        }
        tracing::error!(stage = %id, items = working.len(), "whole working set failed");
        return Dispatch {
            succeeded: Vec::new(),
            failed: working,
            lifecycle_error: Some(error),
        };
    }

    let queue = Arc::new(Mutex::new(VecDeque::from(working.clone())));
    let (tx, mut rx) = mpsc::unbounded_channel::<Outcome>();
    let mut workers = JoinSet::new();
    for fork in ready {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        let id = id.clone();
        workers.spawn_blocking(move || work(fork, &queue, &tx, &id));
    }
    drop(tx);

    let mut result = Dispatch::default();
    while let Some((item, outcome)) = rx.recv().await {
        match outcome {
            Ok(()) => result.succeeded.push(item),
            Err(_) => result.failed.push(item),
        }
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(join_err) = joined {
            tracing::error!(stage = %id, error = %join_err, "worker aborted");
        }
    }

    let settled: HashSet<ItemKey> = result
        .succeeded
        .iter()
        .chain(&result.failed)
        .map(WorkItem::key)
        .collect();
    for item in working {
        if !settled.contains(&item.key()) {
            tracing::error!(stage = %id, item = %item, "no outcome recorded, counting as failed");
            result.failed.push(item);
        }
    }
    result
}

/// Worker loop: pull until the queue is empty, report every outcome.
fn work(
    mut stage: Box<dyn Stage>,
    queue: &Mutex<VecDeque<WorkItem>>,
    outcomes: &mpsc::UnboundedSender<Outcome>,
    id: &StageId,
) {
    loop {
        let next = match queue.lock() {
            Ok(mut pending) => pending.pop_front(),
            Err(_) => None,
        };
        let Some(item) = next else { break };

        tracing::debug!(stage = %id, item = %item, "pre_run");
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            stage.pre_run(&item);
            let outcome = stage.run(&item);
            stage.post_run(&item);
            outcome
        }))
        .unwrap_or_else(|payload| Err(StageError::Panicked(panic_message(payload.as_ref()))));
        tracing::debug!(stage = %id, item = %item, "post_run");

        match &outcome {
            Ok(()) => tracing::debug!(stage = %id, item = %item, "item processed"),
            Err(e) => tracing::error!(
                stage = %id,
                item = %item.full_path.display(),
                error = %e,
                "item failed"
            ),
        }
        if outcomes.send((item, outcome)).is_err() {
            break;
        }
    }
    stage.post_process();
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
