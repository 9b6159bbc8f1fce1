use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::error::{CorralError, Result};
use crate::protocol::{Connection, JobDetail, ManagerMessage};
use crate::scheduler::job::{Job, JobStrategy};
use crate::scheduler::queue::JobQueue;
use crate::scheduler::registry::{WorkerRegistration, WorkerRegistry};

/// One worker's share of a dispatched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedTask {
    pub task_id: u64,
    pub worker: String,
    pub complete: bool,
    /// Set once the worker reports back; `None` while pending.
    pub succeeded: Option<bool>,
}

impl DispatchedTask {
    fn pending(task_id: u64, worker: &str) -> Self {
        Self {
            task_id,
            worker: worker.to_string(),
            complete: false,
            succeeded: None,
        }
    }
}

/// A job that reached at least one worker. The task list is fixed at dispatch.
#[derive(Debug, Clone)]
pub struct DispatchedJob {
    pub job_id: u64,
    pub job: Job,
    pub tasks: Vec<DispatchedTask>,
}

impl DispatchedJob {
    pub fn is_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.complete)
    }

    pub fn detail(&self) -> JobDetail {
        JobDetail {
            job_id: self.job_id,
            is_complete: self.is_complete(),
        }
    }
}

/// What happened to a job handed to [`JobDispatcher::dispatch_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// At least one task was sent.
    Dispatched(JobDetail),
    /// Every target was unreachable; the job went back to the end of the queue.
    Requeued,
    /// No live worker to target; the job was discarded.
    Dropped,
}

impl DispatchOutcome {
    pub fn detail(&self) -> Option<JobDetail> {
        match self {
            DispatchOutcome::Dispatched(detail) => Some(*detail),
            DispatchOutcome::Requeued | DispatchOutcome::Dropped => None,
        }
    }
}

/// Turns jobs into tasks on live workers.
///
/// Owned by the manager control loop; job and task ids come from counters
/// that only this instance advances, so both are strictly increasing.
#[derive(Debug)]
pub struct JobDispatcher {
    registry: Arc<WorkerRegistry>,
    dead_threshold: Duration,
    queue: JobQueue,
    next_job_id: u64,
    next_task_id: u64,
    jobs: BTreeMap<u64, DispatchedJob>,
    task_owner: HashMap<u64, u64>,
}

impl JobDispatcher {
    pub fn new(registry: Arc<WorkerRegistry>, dead_threshold: Duration) -> Self {
        Self {
            registry,
            dead_threshold,
            queue: JobQueue::new(),
            next_job_id: 1,
            next_task_id: 1,
            jobs: BTreeMap::new(),
            task_owner: HashMap::new(),
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue a job for the next drain pass.
    pub async fn queue_job(&mut self, job: Job) {
        if self.registry.get_non_dead(self.dead_threshold).await.is_empty() {
            tracing::warn!(job = job.tag(), "Job queued while no live worker is available");
        }
        self.queue.push(job);
    }

    /// Dispatch every job queued before this call, oldest first.
    ///
    /// Does nothing while no live worker exists. Jobs requeued during the
    /// pass wait for the next one.
    pub async fn process_queue(&mut self) -> Vec<DispatchOutcome> {
        if self.queue.is_empty() {
            return Vec::new();
        }
        if self.registry.get_non_dead(self.dead_threshold).await.is_empty() {
            tracing::debug!(queued = self.queue.len(), "Holding queue, no live worker");
            return Vec::new();
        }

        let pending = self.queue.len();
        let mut outcomes = Vec::with_capacity(pending);
        for _ in 0..pending {
            let Some(job) = self.queue.pop() else { break };
            outcomes.push(self.dispatch_job(job).await);
        }
        outcomes
    }

    /// Send `job` to the workers its strategy selects.
    pub async fn dispatch_job(&mut self, job: Job) -> DispatchOutcome {
        let live = self.registry.get_non_dead(self.dead_threshold).await;
        let targets = select_targets(job.strategy(), live);

        if targets.is_empty() {
            tracing::error!(
                job = job.tag(),
                strategy = %job.strategy(),
                "No live workers to dispatch to, dropping job"
            );
            return DispatchOutcome::Dropped;
        }

        let payload = match job.encode_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(job = job.tag(), error = %e, "Failed to encode job, dropping it");
                return DispatchOutcome::Dropped;
            }
        };

        let mut tasks = Vec::with_capacity(targets.len());
        for target in &targets {
            let Some(connection) = target.connection() else {
                tracing::warn!(
                    worker = %target.name(),
                    "Worker has not finished registering, skipping"
                );
                continue;
            };

            let task_id = self.next_task_id;
            self.next_task_id += 1;

            match send_task(connection, task_id, &job, &payload).await {
                Ok(()) => {
                    tracing::debug!(worker = %target.name(), task_id, job = job.tag(), "Task sent");
                    tasks.push(DispatchedTask::pending(task_id, target.name()));
                }
                Err(e) => {
                    tracing::warn!(
                        worker = %target.name(),
                        task_id,
                        error = %e,
                        "Failed to send task, skipping worker"
                    );
                }
            }
        }

        if tasks.is_empty() {
            tracing::warn!(
                job = job.tag(),
                targets = targets.len(),
                "No target accepted the job, requeueing"
            );
            self.queue.push(job);
            return DispatchOutcome::Requeued;
        }

        let job_id = self.next_job_id;
        self.next_job_id += 1;
        for task in &tasks {
            self.task_owner.insert(task.task_id, job_id);
        }

        let dispatched = DispatchedJob { job_id, job, tasks };
        let detail = dispatched.detail();
        tracing::info!(
            job_id,
            job = dispatched.job.tag(),
            tasks = dispatched.tasks.len(),
            "Job dispatched"
        );
        self.jobs.insert(job_id, dispatched);
        DispatchOutcome::Dispatched(detail)
    }

    /// Record a worker's `COMPLETE`/`FAILED` report for one of its tasks.
    pub fn mark_task_finished(&mut self, task_id: u64, worker: &str, succeeded: bool) -> Result<()> {
        let task = self
            .task_owner
            .get(&task_id)
            .and_then(|job_id| self.jobs.get_mut(job_id))
            .and_then(|job| job.tasks.iter_mut().find(|t| t.task_id == task_id))
            .ok_or_else(|| CorralError::Protocol(format!("unknown task {}", task_id)))?;

        if task.worker != worker {
            return Err(CorralError::Protocol(format!(
                "task {} belongs to {}, not {}",
                task_id, task.worker, worker
            )));
        }
        if task.complete {
            tracing::debug!(task_id, worker, "Duplicate task report ignored");
            return Ok(());
        }

        task.complete = true;
        task.succeeded = Some(succeeded);
        Ok(())
    }

    pub fn job_detail(&self, job_id: u64) -> Option<JobDetail> {
        self.jobs.get(&job_id).map(DispatchedJob::detail)
    }

    pub fn job(&self, job_id: u64) -> Option<&DispatchedJob> {
        self.jobs.get(&job_id)
    }

    /// Every task ever dispatched, in task id order.
    pub fn task_history(&self) -> Vec<&DispatchedTask> {
        let mut tasks: Vec<&DispatchedTask> = self.jobs.values().flat_map(|j| &j.tasks).collect();
        tasks.sort_by_key(|t| t.task_id);
        tasks
    }
}

fn select_targets(strategy: JobStrategy, live: Vec<WorkerRegistration>) -> Vec<WorkerRegistration> {
    match strategy {
        JobStrategy::RunOnAll => live,
        JobStrategy::RunOnOne => live
            .choose(&mut rand::thread_rng())
            .cloned()
            .into_iter()
            .collect(),
    }
}

async fn send_task(connection: &Connection, task_id: u64, job: &Job, payload: &[u8]) -> Result<()> {
    let command = ManagerMessage::Execute {
        task_id,
        tag: job.tag().to_string(),
    }
    .to_string();
    connection.send_frames(&[command.as_bytes(), payload]).await
}
