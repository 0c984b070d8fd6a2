// SPDX-License-Identifier: MIT

//! Job identifier, data model, and per-job state machine.

use crate::id::JobId;
use crate::stage::StageKey;
use crate::PhotoId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Status of a job. Terminal states: `Completed`, `Failed`, `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    WaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses can never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::WaitingInput => "waiting_input",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One completed pipeline stage's recorded output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub stage: StageKey,
    pub output_url: String,
}

/// Everything needed to create a new job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub id: JobId,
    pub photo_id: PhotoId,
    pub photo_name: String,
    pub original_path: PathBuf,
    pub steps: Vec<StageKey>,
    pub options: HashMap<StageKey, String>,
    pub priority: i64,
    pub created_at_ms: u64,
    /// Crop rectangle supplied at creation time (`POST /jobs`'s `cropRects`
    /// map), so a job whose first step is `crop` doesn't pause needlessly.
    pub initial_crop_rect: Option<String>,
    /// Mask path already decoded and stored under uploads at creation time
    /// (`POST /jobs`'s `masks` map).
    pub initial_mask_path: Option<PathBuf>,
}

/// A unit of scheduling: an ordered pipeline of stages bound to one photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub photo_id: PhotoId,
    /// Snapshot of the photo's display name, survives photo deletion.
    pub photo_name: String,
    pub original_path: PathBuf,
    pub steps: Vec<StageKey>,
    pub options: HashMap<StageKey, String>,
    pub status: JobStatus,
    /// Integer percent in `[0, 100]`.
    pub progress: u8,
    pub current_step: Option<StageKey>,
    pub waiting_step: Option<StageKey>,
    pub waiting_image: Option<String>,
    pub resume_from_step: usize,
    pub current_input_path: PathBuf,
    pub step_results: Vec<StepResult>,
    pub crop_rect: Option<String>,
    pub mask_path: Option<PathBuf>,
    pub priority: i64,
    pub created_at_ms: u64,
    pub result: Option<String>,
    pub error: Option<String>,
    pub failed_step: Option<StageKey>,
    pub failed_step_index: Option<usize>,
}

impl Job {
    /// Create a new job in `Pending` status, ready for the scheduler to
    /// pick up on the next dispatch pass.
    pub fn new(config: JobConfig) -> Self {
        Self {
            id: config.id,
            photo_id: config.photo_id,
            photo_name: config.photo_name,
            original_path: config.original_path.clone(),
            steps: config.steps,
            options: config.options,
            status: JobStatus::Pending,
            progress: 0,
            current_step: None,
            waiting_step: None,
            waiting_image: None,
            resume_from_step: 0,
            current_input_path: config.original_path,
            step_results: Vec::new(),
            crop_rect: config.initial_crop_rect,
            mask_path: config.initial_mask_path,
            priority: config.priority,
            created_at_ms: config.created_at_ms,
            result: None,
            error: None,
            failed_step: None,
            failed_step_index: None,
        }
    }

    /// True iff any stage strictly before `resume_from_step` is manual —
    /// the derived `canGoBack` field from the data model.
    pub fn can_go_back(&self) -> bool {
        self.steps[..self.resume_from_step.min(self.steps.len())]
            .iter()
            .any(StageKey::is_manual)
    }

    /// Clear the error fields. Used by `retry`/`skipFailed` on re-entry.
    pub fn clear_error(&mut self) {
        self.error = None;
        self.failed_step = None;
        self.failed_step_index = None;
    }

    /// Clear the transient "waiting for input" fields. Used whenever a
    /// waiting job resumes execution (submitInput, skip, rewind).
    pub fn clear_waiting(&mut self) {
        self.waiting_step = None;
        self.waiting_image = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(steps: Vec<StageKey>) -> JobConfig {
        JobConfig {
            id: JobId::new("job-1"),
            photo_id: PhotoId::new("photo-1"),
            photo_name: "sunset.jpg".to_string(),
            original_path: PathBuf::from("/uploads/sunset.jpg"),
            steps,
            options: HashMap::new(),
            priority: 0,
            created_at_ms: 1_000,
            initial_crop_rect: None,
            initial_mask_path: None,
        }
    }

    #[test]
    fn new_job_starts_pending_at_step_zero() {
        let job = Job::new(config(vec![StageKey::FaceRestore]));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.resume_from_step, 0);
        assert!(job.step_results.is_empty());
        assert_eq!(job.current_input_path, job.original_path);
    }

    #[test]
    fn can_go_back_false_when_no_manual_stage_precedes_resume_point() {
        let mut job = Job::new(config(vec![StageKey::FaceRestore, StageKey::Crop]));
        job.resume_from_step = 1;
        assert!(!job.can_go_back());
    }

    #[test]
    fn can_go_back_true_when_manual_stage_precedes_resume_point() {
        let mut job = Job::new(config(vec![StageKey::Crop, StageKey::FaceRestore]));
        job.resume_from_step = 1;
        assert!(job.can_go_back());
    }

    #[test]
    fn clear_error_resets_all_three_failure_fields() {
        let mut job = Job::new(config(vec![StageKey::FaceRestore]));
        job.error = Some("boom".to_string());
        job.failed_step = Some(StageKey::FaceRestore);
        job.failed_step_index = Some(0);
        job.clear_error();
        assert!(job.error.is_none());
        assert!(job.failed_step.is_none());
        assert!(job.failed_step_index.is_none());
    }
}
