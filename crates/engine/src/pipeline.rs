// SPDX-License-Identifier: MIT

//! Per-job pipeline execution (spec.md §4.4.3). Each call to
//! [`run`] drives one job from its current `resume_from_step` either to
//! completion, a failure, a cancellation, or a manual pause — whichever
//! comes first — then triggers a redispatch so other jobs can advance.

use crate::scheduler::SchedulerInner;
use rst_core::{Clock, JobId, JobStatus, StepResult};
use std::path::PathBuf;
use std::sync::Arc;

struct Invocation {
    index: usize,
    key: rst_core::StageKey,
    script: String,
    argv: Vec<String>,
    output_path: PathBuf,
}

fn progress_for(index: usize, total: usize) -> u8 {
    if total == 0 {
        100
    } else {
        ((100 * index) / total) as u8
    }
}

pub(crate) async fn run<C: Clock>(inner: Arc<SchedulerInner<C>>, job_id: JobId) {
    loop {
        let invocation = {
            let mut data = inner.data.lock();
            let Some(job) = data.jobs.get_mut(&job_id) else {
                return;
            };
            if job.status != JobStatus::Processing {
                return;
            }

            let i = job.resume_from_step;
            if i >= job.steps.len() {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.current_step = None;
                job.clear_waiting();
                job.result = job.step_results.last().map(|r| r.output_url.clone());
                drop(data);
                inner_dispatch(&inner);
                return;
            }

            let key = job.steps[i];
            let Some(stage) = inner.registry.get(key) else {
                tracing::warn!(job_id = %job_id, stage = %key, "skipping unregistered stage key");
                job.resume_from_step = i + 1;
                continue;
            };

            if stage.manual() && stage.needs_input(job) {
                job.status = JobStatus::WaitingInput;
                job.waiting_step = Some(key);
                job.waiting_image = inner
                    .artifacts
                    .path_to_url(&job.current_input_path)
                    .ok();
                job.resume_from_step = i;
                job.progress = progress_for(i, job.steps.len());
                drop(data);
                inner_dispatch(&inner);
                return;
            }

            job.current_step = Some(key);
            job.progress = progress_for(i, job.steps.len());
            let output_path =
                inner
                    .artifacts
                    .stage_output_path(&job.photo_name, stage.output_prefix(), &job.id);
            let selected_model = job
                .options
                .get(&key)
                .cloned()
                .or_else(|| stage.default_model().map(str::to_string));
            let input_path = job.current_input_path.clone();
            let argv = stage.build_args(&input_path, &output_path, job, selected_model.as_deref());
            let script = stage.worker_script().to_string();
            Invocation {
                index: i,
                key,
                script,
                argv,
                output_path,
            }
        };

        // Cancellation checkpoint immediately before invoking the worker
        // (spec.md §4.4.3 step 7).
        let still_processing = inner
            .data
            .lock()
            .jobs
            .get(&job_id)
            .map(|j| j.status == JobStatus::Processing)
            .unwrap_or(false);
        if !still_processing {
            return;
        }

        let result = inner
            .invoker
            .invoke(&job_id, &invocation.script, &invocation.argv)
            .await;

        let mut data = inner.data.lock();
        let Some(job) = data.jobs.get_mut(&job_id) else {
            return;
        };
        // Cancellation checkpoint immediately after invoking (step 9):
        // discard the result without recording it.
        if job.status == JobStatus::Cancelled {
            return;
        }

        match result {
            Err(err) => {
                job.status = JobStatus::Failed;
                job.failed_step = Some(invocation.key);
                job.failed_step_index = Some(invocation.index);
                job.error = Some(err.to_string());
                job.current_step = None;
                drop(data);
                tracing::error!(job_id = %job_id, stage = %invocation.key, "worker failed");
                inner_dispatch(&inner);
                return;
            }
            Ok(_stdout) => {
                if let Some(stage) = inner.registry.get(invocation.key) {
                    stage.on_complete(job, &inner.artifacts);
                }
                let url = inner
                    .artifacts
                    .path_to_url(&invocation.output_path)
                    .unwrap_or_default();
                job.step_results.push(StepResult {
                    stage: invocation.key,
                    output_url: url,
                });
                job.current_input_path = invocation.output_path;
                job.resume_from_step = invocation.index + 1;
                drop(data);
                // Redispatch so a queued manual job may claim the input
                // focus this job just released for its next automatic
                // step (spec.md §4.4.3 step 11); this job's own slot is
                // retained implicitly and the loop continues below.
                inner_dispatch(&inner);
            }
        }
    }
}

fn inner_dispatch<C: Clock>(inner: &Arc<SchedulerInner<C>>) {
    crate::scheduler::dispatch_from_inner(inner);
}
