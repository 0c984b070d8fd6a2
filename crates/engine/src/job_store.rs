// SPDX-License-Identifier: MIT

//! In-memory job store: authoritative source of all scheduler state
//! (spec.md §2 item 3). No persistence by design (spec.md §1 Non-goals).

use rst_core::{Job, JobId, JobStatus};
use std::collections::HashMap;

/// Owns every known job. All mutation happens through this type so the
/// scheduler remains the single writer (spec.md §5).
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<JobId, Job>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(id)
    }

    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Every job, in the `GET /jobs` display order: `waiting_input`, then
    /// `processing`, then `pending` by priority ascending, then terminal
    /// states by `createdAt` descending.
    pub fn all_in_display_order(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by(|a, b| display_rank(a).cmp(&display_rank(b)).then_with(|| {
            match (a.status, b.status) {
                (JobStatus::Pending, JobStatus::Pending) => a.priority.cmp(&b.priority),
                _ => b.created_at_ms.cmp(&a.created_at_ms),
            }
        }));
        jobs
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|j| j.status == status).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }
}

fn display_rank(job: &Job) -> u8 {
    match job.status {
        JobStatus::WaitingInput => 0,
        JobStatus::Processing => 1,
        JobStatus::Pending => 2,
        _ => 3,
    }
}
