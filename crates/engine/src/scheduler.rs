// SPDX-License-Identifier: MIT

//! The admission and dispatch engine (spec.md §4.4). Single writer: every
//! mutation of the [`JobStore`] happens behind `SchedulerInner::data`.

use crate::job_store::JobStore;
use crate::pipeline;
use crate::registry::StageRegistry;
use rst_adapters::{ArtifactStore, WorkerInvoker};
use rst_core::{Clock, Job, JobConfig, JobId, JobStatus, SchedulerError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) struct SchedulerData {
    pub(crate) jobs: JobStore,
    pub(crate) max_concurrent: u32,
}

/// Shared state behind the `Scheduler` handle. Cheap to clone (it's an
/// `Arc`); every clone drives the same underlying jobs.
pub(crate) struct SchedulerInner<C: Clock> {
    pub(crate) data: parking_lot::Mutex<SchedulerData>,
    pub(crate) registry: StageRegistry,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) invoker: Arc<dyn WorkerInvoker>,
    pub(crate) clock: C,
    last_heartbeat: parking_lot::Mutex<Instant>,
    heartbeat_timeout: Duration,
    max_concurrent_limit: u32,
}

/// One candidate picked by a dispatch pass: advance to `processing` and
/// spawn its pipeline task.
struct Dispatched(JobId);

/// The scheduler handle. Clone freely — every clone shares one job store.
pub struct Scheduler<C: Clock> {
    inner: Arc<SchedulerInner<C>>,
}

impl<C: Clock> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn new(
        registry: StageRegistry,
        artifacts: ArtifactStore,
        invoker: Arc<dyn WorkerInvoker>,
        clock: C,
        max_concurrent: u32,
        max_concurrent_limit: u32,
        heartbeat_timeout: Duration,
    ) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(SchedulerInner {
                data: parking_lot::Mutex::new(SchedulerData {
                    jobs: JobStore::new(),
                    max_concurrent: max_concurrent.max(1),
                }),
                registry,
                artifacts,
                invoker,
                clock,
                last_heartbeat: parking_lot::Mutex::new(now),
                heartbeat_timeout,
                max_concurrent_limit: max_concurrent_limit.max(1),
            }),
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.inner.registry
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.artifacts
    }

    pub(crate) fn clock(&self) -> &C {
        &self.inner.clock
    }

    /// Create jobs from already-validated configs, admit them as `pending`,
    /// and trigger a dispatch pass.
    pub fn create_jobs(&self, configs: Vec<JobConfig>) -> Vec<Job> {
        let mut created = Vec::with_capacity(configs.len());
        {
            let mut data = self.inner.data.lock();
            for config in configs {
                let job = Job::new(config);
                data.jobs.insert(job.clone());
                created.push(job);
            }
        }
        self.dispatch();
        created
    }

    /// `GET /jobs`'s contract: refresh the heartbeat, return every job in
    /// display order.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.refresh_heartbeat();
        let data = self.inner.data.lock();
        data.jobs
            .all_in_display_order()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job, SchedulerError> {
        let data = self.inner.data.lock();
        data.jobs
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(format!("no job {id}")))
    }

    pub fn refresh_heartbeat(&self) {
        let mut guard = self.inner.last_heartbeat.lock();
        *guard = self.inner.clock.now();
    }

    /// §4.4.4 `submitInput`.
    pub fn submit_input(
        &self,
        id: &JobId,
        crop_rect: Option<String>,
        mask_data_url: Option<String>,
    ) -> Result<(), SchedulerError> {
        {
            let mut data = self.inner.data.lock();
            let job = data
                .jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(format!("no job {id}")))?;
            if job.status != JobStatus::WaitingInput {
                return Err(SchedulerError::IllegalStateTransition(format!(
                    "submitInput requires waiting_input, job is {}",
                    job.status
                )));
            }
            if job.waiting_step == Some(rst_core::StageKey::Crop) {
                if let Some(rect) = crop_rect {
                    job.crop_rect = Some(rect);
                }
            }
            if job.waiting_step == Some(rst_core::StageKey::Inpaint) {
                if let Some(data_url) = mask_data_url {
                    let bytes = crate::mask::decode_data_url(&data_url)?;
                    let path = self.inner.artifacts.alloc_mask_path();
                    std::fs::write(&path, &bytes).map_err(|e| {
                        SchedulerError::Validation(format!("failed to write mask: {e}"))
                    })?;
                    job.mask_path = Some(path);
                }
            }
            job.clear_waiting();
            job.status = JobStatus::Processing;
        }
        self.spawn_run(id.clone());
        self.dispatch();
        Ok(())
    }

    /// §4.4.4 `skipStep`.
    pub fn skip_step(&self, id: &JobId) -> Result<(), SchedulerError> {
        {
            let mut data = self.inner.data.lock();
            let job = data
                .jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(format!("no job {id}")))?;
            if job.status != JobStatus::WaitingInput {
                return Err(SchedulerError::IllegalStateTransition(format!(
                    "skipStep requires waiting_input, job is {}",
                    job.status
                )));
            }
            job.resume_from_step += 1;
            job.clear_waiting();
            job.status = JobStatus::Processing;
        }
        self.spawn_run(id.clone());
        self.dispatch();
        Ok(())
    }

    /// §4.4.4 `rewind`.
    pub fn rewind(&self, id: &JobId) -> Result<(), SchedulerError> {
        {
            let mut data = self.inner.data.lock();
            let job = data
                .jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(format!("no job {id}")))?;
            if job.status != JobStatus::WaitingInput {
                return Err(SchedulerError::IllegalStateTransition(format!(
                    "rewind requires waiting_input, job is {}",
                    job.status
                )));
            }
            let target = job.steps[..job.resume_from_step]
                .iter()
                .enumerate()
                .rev()
                .find(|(_, key)| key.is_manual())
                .map(|(idx, _)| idx)
                .ok_or(SchedulerError::NoPreviousManualStep)?;

            for i in target..job.steps.len() {
                if let Some(stage) = self.inner.registry.get(job.steps[i]) {
                    if job.steps[i].is_manual() {
                        stage.on_complete(job, &self.inner.artifacts);
                    }
                }
            }
            job.step_results.truncate(target);
            job.current_input_path = match job.step_results.last() {
                Some(result) => self
                    .inner
                    .artifacts
                    .url_to_path(&result.output_url)
                    .unwrap_or_else(|_| job.original_path.clone()),
                None => job.original_path.clone(),
            };
            job.resume_from_step = target;
            job.clear_waiting();
            job.status = JobStatus::Processing;
        }
        self.spawn_run(id.clone());
        self.dispatch();
        Ok(())
    }

    /// §4.4.5 `retry`.
    pub fn retry(&self, id: &JobId, model: Option<String>) -> Result<(), SchedulerError> {
        {
            let mut data = self.inner.data.lock();
            let job = data
                .jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(format!("no job {id}")))?;
            if job.status != JobStatus::Failed {
                return Err(SchedulerError::IllegalStateTransition(format!(
                    "retry requires failed, job is {}",
                    job.status
                )));
            }
            if let (Some(model), Some(failed_step)) = (&model, job.failed_step) {
                let stage = self.inner.registry.get(failed_step);
                let known = stage.map(|s| s.models().contains_key(model)).unwrap_or(false);
                if !known {
                    return Err(SchedulerError::Validation(format!(
                        "unknown model {model:?} for stage {failed_step}"
                    )));
                }
                job.options.insert(failed_step, model.clone());
            }
            job.resume_from_step = job.failed_step_index.unwrap_or(job.resume_from_step);
            job.clear_error();
            job.status = JobStatus::Processing;
        }
        self.spawn_run(id.clone());
        self.dispatch();
        Ok(())
    }

    /// §4.4.5 `skipFailed`.
    pub fn skip_failed(&self, id: &JobId) -> Result<(), SchedulerError> {
        let mut resumed = false;
        {
            let mut data = self.inner.data.lock();
            let job = data
                .jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(format!("no job {id}")))?;
            if job.status != JobStatus::Failed {
                return Err(SchedulerError::IllegalStateTransition(format!(
                    "skipFailed requires failed, job is {}",
                    job.status
                )));
            }
            let next = job.failed_step_index.unwrap_or(job.resume_from_step) + 1;
            job.clear_error();
            if next >= job.steps.len() {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.current_step = None;
                job.result = job.step_results.last().map(|r| r.output_url.clone());
            } else {
                job.resume_from_step = next;
                job.status = JobStatus::Processing;
                resumed = true;
            }
        }
        if resumed {
            self.spawn_run(id.clone());
        }
        self.dispatch();
        Ok(())
    }

    /// §4.4.6 `cancel`.
    pub async fn cancel(&self, id: &JobId) -> Result<(), SchedulerError> {
        let cancellable = {
            let mut data = self.inner.data.lock();
            let job = data
                .jobs
                .get_mut(id)
                .ok_or_else(|| SchedulerError::NotFound(format!("no job {id}")))?;
            if !matches!(
                job.status,
                JobStatus::Pending | JobStatus::Processing | JobStatus::WaitingInput
            ) {
                return Err(SchedulerError::IllegalStateTransition(format!(
                    "cancel is illegal on a {} job",
                    job.status
                )));
            }
            job.status = JobStatus::Cancelled;
            job.current_step = None;
            job.clear_waiting();
            true
        };
        if cancellable {
            self.inner.invoker.cancel(id).await;
        }
        self.dispatch();
        Ok(())
    }

    /// §4.4.6 `cancelAll`.
    pub async fn cancel_all(&self) -> usize {
        let ids = {
            let data = self.inner.data.lock();
            data.jobs
                .iter()
                .filter(|j| {
                    matches!(
                        j.status,
                        JobStatus::Pending | JobStatus::Processing | JobStatus::WaitingInput
                    )
                })
                .map(|j| j.id.clone())
                .collect::<Vec<_>>()
        };
        self.cancel_ids(&ids).await
    }

    /// Shared by `cancelAll` and the heartbeat monitor (which only targets
    /// `pending`/`processing` jobs).
    pub(crate) async fn cancel_ids(&self, ids: &[JobId]) -> usize {
        let mut cancelled = 0;
        for id in ids {
            if self.cancel(id).await.is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub(crate) fn heartbeat_elapsed(&self) -> Duration {
        let last = *self.inner.last_heartbeat.lock();
        self.inner.clock.now().saturating_duration_since(last)
    }

    pub(crate) fn heartbeat_timeout(&self) -> Duration {
        self.inner.heartbeat_timeout
    }

    pub(crate) fn pending_or_processing_ids(&self) -> Vec<JobId> {
        let data = self.inner.data.lock();
        data.jobs
            .iter()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Processing))
            .map(|j| j.id.clone())
            .collect()
    }

    /// §4.4.7 `reorder`.
    pub fn reorder(&self, ordered_pending_ids: &[JobId]) {
        {
            let mut data = self.inner.data.lock();
            for (position, id) in ordered_pending_ids.iter().enumerate() {
                if let Some(job) = data.jobs.get_mut(id) {
                    if job.status == JobStatus::Pending {
                        job.priority = position as i64;
                    }
                }
            }
        }
        self.dispatch();
    }

    /// §4.4.8 `setMaxConcurrent`.
    pub fn set_max_concurrent(&self, value: u32) -> bool {
        if value < 1 || value > self.inner.max_concurrent_limit {
            return false;
        }
        {
            let mut data = self.inner.data.lock();
            data.max_concurrent = value;
        }
        self.dispatch();
        true
    }

    pub fn max_concurrent(&self) -> u32 {
        self.inner.data.lock().max_concurrent
    }

    pub fn max_concurrent_limit(&self) -> u32 {
        self.inner.max_concurrent_limit
    }

    /// Drop any job record whose `result` URL no longer resolves to a file
    /// on disk (spec.md §4.6).
    pub fn prune_jobs_with_missing_result(&self) -> usize {
        let mut data = self.inner.data.lock();
        let missing: Vec<JobId> = data
            .jobs
            .iter()
            .filter(|j| match &j.result {
                Some(url) => self.inner.artifacts.url_to_path(url).map(|p| !p.exists()).unwrap_or(true),
                None => false,
            })
            .map(|j| j.id.clone())
            .collect();
        let count = missing.len();
        for id in &missing {
            data.jobs.remove(id);
        }
        count
    }

    fn spawn_run(&self, id: JobId) {
        spawn_run_from_inner(&self.inner, id);
    }

    /// §4.4.2: evaluate the candidate set once and spawn a pipeline task for
    /// every admitted job. Safe to call redundantly — it's pure given the
    /// current snapshot of job state.
    pub fn dispatch(&self) {
        dispatch_from_inner(&self.inner);
    }
}

pub(crate) fn spawn_run_from_inner<C: Clock>(inner: &Arc<SchedulerInner<C>>, id: JobId) {
    tokio::spawn(pipeline::run(Arc::clone(inner), id));
}

/// Free-function twin of [`Scheduler::dispatch`] usable from `pipeline::run`,
/// which only holds the `Arc<SchedulerInner<C>>`, not a `Scheduler` handle.
pub(crate) fn dispatch_from_inner<C: Clock>(inner: &Arc<SchedulerInner<C>>) {
    let dispatched = {
        let mut data = inner.data.lock();
        decide_dispatch(&mut data, &inner.registry)
    };
    for Dispatched(id) in dispatched {
        spawn_run_from_inner(inner, id);
    }
}

fn decide_dispatch(data: &mut SchedulerData, registry: &StageRegistry) -> Vec<Dispatched> {
    let mut has_waiting_manual = data.jobs.count_by_status(JobStatus::WaitingInput) > 0;
    let running = data.jobs.count_by_status(JobStatus::Processing);
    let mut slots_used = 0u32;

    let mut candidate_ids: Vec<JobId> = data
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::Pending)
        .filter(|j| !has_waiting_manual || !j.steps.iter().any(|s| s.is_manual()))
        .map(|j| j.id.clone())
        .collect();
    candidate_ids.sort_by_key(|id| data.jobs.get(id).map(|j| j.priority).unwrap_or(i64::MAX));

    let mut dispatched = Vec::new();
    let manual_keys: HashSet<_> = registry.manual_keys();
    for id in candidate_ids {
        let Some(job) = data.jobs.get(&id) else { continue };
        let Some(&key) = job.steps.get(job.resume_from_step) else {
            // empty or already-exhausted steps list: dispatch so the
            // pipeline loop can immediately mark it completed.
            dispatched.push(id.clone());
            if let Some(job) = data.jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
            }
            continue;
        };
        let will_pause = manual_keys.contains(&key)
            && registry
                .get(key)
                .map(|s| s.needs_input(job))
                .unwrap_or(false);

        if will_pause {
            if has_waiting_manual {
                continue;
            }
            has_waiting_manual = true;
        } else if running + slots_used >= data.max_concurrent {
            continue;
        } else {
            slots_used += 1;
        }

        if let Some(job) = data.jobs.get_mut(&id) {
            job.status = JobStatus::Processing;
        }
        dispatched.push(id);
    }

    dispatched.into_iter().map(Dispatched).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rst_adapters::FakeInvoker;
    use rst_core::{FakeClock, PhotoId, StageKey};
    use std::collections::HashMap;

    fn scheduler(max_concurrent: u32) -> (Scheduler<FakeClock>, Arc<FakeInvoker>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts =
            ArtifactStore::new(dir.path().join("uploads"), dir.path().join("results")).unwrap();
        let invoker = Arc::new(FakeInvoker::new());
        let scheduler = Scheduler::new(
            StageRegistry::new(),
            artifacts,
            invoker.clone(),
            FakeClock::new(),
            max_concurrent,
            4,
            Duration::from_secs(10),
        );
        (scheduler, invoker, dir)
    }

    fn config(steps: Vec<StageKey>, priority: i64) -> JobConfig {
        JobConfig {
            id: JobId::new(uuid_like()),
            photo_id: PhotoId::new("photo"),
            photo_name: "sunset.jpg".to_string(),
            original_path: std::path::PathBuf::from("/uploads/sunset.jpg"),
            steps,
            options: HashMap::new(),
            priority,
            created_at_ms: 0,
            initial_crop_rect: None,
            initial_mask_path: None,
        }
    }

    fn uuid_like() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!("job-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[tokio::test]
    async fn automatic_pipeline_runs_to_completion() {
        let (scheduler, _invoker, _dir) = scheduler(2);
        let jobs = scheduler.create_jobs(vec![config(vec![StageKey::FaceRestore], 0)]);
        let id = jobs[0].id.clone();

        for _ in 0..50 {
            if scheduler.get_job(&id).unwrap().status == JobStatus::Completed {
                break;
            }
            tokio::task::yield_now().await;
        }
        let job = scheduler.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.step_results.len(), 1);
    }

    #[tokio::test]
    async fn manual_job_with_no_crop_rect_pauses_immediately() {
        let (scheduler, _invoker, _dir) = scheduler(2);
        let jobs = scheduler.create_jobs(vec![config(vec![StageKey::Crop], 0)]);
        let id = jobs[0].id.clone();

        for _ in 0..50 {
            if scheduler.get_job(&id).unwrap().status == JobStatus::WaitingInput {
                break;
            }
            tokio::task::yield_now().await;
        }
        let job = scheduler.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::WaitingInput);
        assert_eq!(job.waiting_step, Some(StageKey::Crop));
    }

    #[tokio::test]
    async fn manual_gate_holds_second_manual_job_pending() {
        let (scheduler, _invoker, _dir) = scheduler(1);
        let jobs = scheduler.create_jobs(vec![
            config(vec![StageKey::Crop, StageKey::FaceRestore], 0),
            config(vec![StageKey::Crop, StageKey::FaceRestore], 1),
        ]);
        let (j1, j2) = (jobs[0].id.clone(), jobs[1].id.clone());

        for _ in 0..50 {
            if scheduler.get_job(&j1).unwrap().status == JobStatus::WaitingInput {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.get_job(&j1).unwrap().status, JobStatus::WaitingInput);
        assert_eq!(scheduler.get_job(&j2).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn reorder_updates_pending_priority_and_ignores_others() {
        // Two manual jobs: dispatch's input-focus gate admits the first
        // synchronously (claims the focus) and leaves the second pending,
        // so right after `create_jobs` (no `.await` yet) their statuses are
        // deterministic without racing the spawned pipeline tasks.
        let (scheduler, _invoker, _dir) = scheduler(2);
        let jobs = scheduler.create_jobs(vec![
            config(vec![StageKey::Crop], 0),
            config(vec![StageKey::Crop], 1),
        ]);
        let (first, second) = (jobs[0].id.clone(), jobs[1].id.clone());
        assert_eq!(scheduler.get_job(&first).unwrap().status, JobStatus::Processing);
        assert_eq!(scheduler.get_job(&second).unwrap().status, JobStatus::Pending);

        scheduler.reorder(&[second.clone(), JobId::new("ghost")]);

        assert_eq!(scheduler.get_job(&second).unwrap().priority, 0);
        // `first` is no longer pending, so reorder must leave its priority alone.
        assert_eq!(scheduler.get_job(&first).unwrap().priority, 0);
    }

    #[test]
    fn set_max_concurrent_rejects_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts =
            ArtifactStore::new(dir.path().join("uploads"), dir.path().join("results")).unwrap();
        let scheduler = Scheduler::new(
            StageRegistry::new(),
            artifacts,
            Arc::new(FakeInvoker::new()) as Arc<dyn WorkerInvoker>,
            FakeClock::new(),
            2,
            4,
            Duration::from_secs(10),
        );
        assert!(!scheduler.set_max_concurrent(0));
        assert!(!scheduler.set_max_concurrent(5));
        assert_eq!(scheduler.max_concurrent(), 2);
        assert!(scheduler.set_max_concurrent(3));
        assert_eq!(scheduler.max_concurrent(), 3);
    }
}
