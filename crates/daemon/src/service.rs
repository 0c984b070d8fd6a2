// SPDX-License-Identifier: MIT

//! The daemon-facing facade (spec.md §6 / §4.7): one async method per row of
//! the external control surface, excluding the static-asset routes and the
//! HTTP transport itself, which live outside this crate's scope.

use rst_adapters::{ArtifactError, ArtifactStore, InvokeError, WorkerInvoker};
use rst_core::{
    Clock, IdGen, Job, JobConfig, JobId, Photo, PhotoId, PublicStageInfo, SchedulerError, StageKey,
};
use rst_engine::{PhotoStore, Scheduler};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// File extensions `POST /photos` accepts.
pub const ALLOWED_UPLOAD_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "tiff", "bmp"];
/// Per-file size cap for `POST /photos`.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
/// Max files accepted by a single `POST /photos` call.
pub const MAX_UPLOAD_FILES: usize = 20;

const CROP_SCRIPT: &str = "crop.py";
const AUTO_CROP_SCRIPT: &str = "auto_crop.py";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not ready: {0}")]
    NotReady(String),
}

/// One file from a `POST /photos` multipart body, already split into parts
/// by the (out-of-scope) HTTP edge.
pub struct NewUpload {
    pub display_name: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// One element of `POST /jobs`'s `photoIds`/`steps`/`options`/`masks`/
/// `cropRects` maps, already demultiplexed per photo by the HTTP edge.
pub struct CreateJobRequest {
    pub photo_id: PhotoId,
    pub steps: Vec<StageKey>,
    pub options: HashMap<StageKey, String>,
    pub crop_rect: Option<String>,
    pub mask_data_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub max_concurrent: u32,
    pub max_concurrent_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub ai_ready: bool,
    pub device: String,
    pub setup_running: bool,
    pub setup_status: String,
    pub setup_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutoCropRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Owns the job scheduler, the photo records, and an invoker handle for the
/// two synchronous (non-pipeline) photo operations — crop-apply and
/// auto-crop — that run outside the job state machine.
pub struct Service<C: Clock, I: IdGen> {
    scheduler: Scheduler<C>,
    photos: Arc<parking_lot::Mutex<PhotoStore>>,
    invoker: Arc<dyn WorkerInvoker>,
    ids: I,
    clock: C,
}

impl<C: Clock, I: IdGen> Service<C, I> {
    pub fn new(
        scheduler: Scheduler<C>,
        photos: Arc<parking_lot::Mutex<PhotoStore>>,
        invoker: Arc<dyn WorkerInvoker>,
        ids: I,
        clock: C,
    ) -> Self {
        Self {
            scheduler,
            photos,
            invoker,
            ids,
            clock,
        }
    }

    fn artifacts(&self) -> &ArtifactStore {
        self.scheduler.artifacts()
    }

    /// `POST /photos`.
    pub fn upload_photos(&self, uploads: Vec<NewUpload>) -> Result<Vec<Photo>, ServiceError> {
        if uploads.len() > MAX_UPLOAD_FILES {
            return Err(ServiceError::Validation(format!(
                "at most {MAX_UPLOAD_FILES} files per upload"
            )));
        }
        let mut created = Vec::with_capacity(uploads.len());
        for upload in uploads {
            if !ALLOWED_UPLOAD_EXTENSIONS.contains(&upload.extension.to_lowercase().as_str()) {
                return Err(ServiceError::Validation(format!(
                    "unsupported extension {:?}",
                    upload.extension
                )));
            }
            if upload.bytes.len() > MAX_UPLOAD_BYTES {
                return Err(ServiceError::Validation(format!(
                    "{} exceeds the {MAX_UPLOAD_BYTES}-byte upload cap",
                    upload.display_name
                )));
            }
            created.push(self.store_upload(upload.display_name, &upload.extension, &upload.bytes)?);
        }
        Ok(created)
    }

    fn store_upload(
        &self,
        display_name: String,
        extension: &str,
        bytes: &[u8],
    ) -> Result<Photo, ServiceError> {
        let path = self.artifacts().alloc_upload_path(extension);
        std::fs::write(&path, bytes).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        let stored_filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let photo = Photo::new(
            PhotoId::new(self.ids.next()),
            stored_filename,
            display_name,
            self.clock.epoch_ms(),
        );
        self.photos.lock().insert(photo.clone());
        Ok(photo)
    }

    /// `GET /photos`.
    pub fn list_photos(&self) -> Vec<Photo> {
        self.photos.lock().iter().cloned().collect()
    }

    /// `DELETE /photos/:id`.
    pub fn delete_photo(&self, id: &PhotoId) -> Result<(), ServiceError> {
        let photo = {
            let mut guard = self.photos.lock();
            guard
                .remove(id)
                .ok_or_else(|| SchedulerError::NotFound(format!("no photo {id}")))?
        };
        let path = self.artifacts().uploads_dir().join(&photo.stored_filename);
        self.artifacts().delete(&path)?;
        Ok(())
    }

    /// `DELETE /photos`.
    pub fn clear_photos(&self) {
        let photos: Vec<Photo> = {
            let mut guard = self.photos.lock();
            let all = guard.iter().cloned().collect();
            guard.clear();
            all
        };
        for photo in photos {
            let path = self.artifacts().uploads_dir().join(&photo.stored_filename);
            if let Err(err) = self.artifacts().delete(&path) {
                tracing::warn!(?err, photo_id = %photo.id, "failed to delete cleared photo's file");
            }
        }
    }

    /// `POST /photos/import`: copy a `/results/...` or `/uploads/...`
    /// artifact into uploads as a fresh photo record.
    pub fn import_photo(&self, result_path: &str, display_name: String) -> Result<Photo, ServiceError> {
        let src = self.artifacts().url_to_path(result_path)?;
        let extension = src
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_string();
        let bytes = std::fs::read(&src).map_err(|source| ArtifactError::Io {
            path: src.clone(),
            source,
        })?;
        self.store_upload(display_name, &extension, &bytes)
    }

    /// `POST /photos/:id/crop`: apply a crop synchronously via the same
    /// worker script the `crop` stage uses, producing a new photo.
    pub async fn crop_photo(&self, id: &PhotoId, crop_rect: &str) -> Result<Photo, ServiceError> {
        let photo = self
            .photos
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(format!("no photo {id}")))?;
        let src = self.artifacts().uploads_dir().join(&photo.stored_filename);
        let extension = src
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_string();
        let dst = self.artifacts().alloc_upload_path(&extension);
        let job_id = JobId::new(self.ids.next());
        self.invoker
            .invoke(
                &job_id,
                CROP_SCRIPT,
                &[
                    src.to_string_lossy().into_owned(),
                    dst.to_string_lossy().into_owned(),
                    crop_rect.to_string(),
                ],
            )
            .await?;
        let stored_filename = dst
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let cropped = Photo::new(
            PhotoId::new(self.ids.next()),
            stored_filename,
            photo.display_name,
            self.clock.epoch_ms(),
        );
        self.photos.lock().insert(cropped.clone());
        Ok(cropped)
    }

    /// `GET /auto-crop/:photoId`: heuristic content-bounds detection.
    pub async fn auto_crop(&self, id: &PhotoId) -> Result<AutoCropRect, ServiceError> {
        let photo = self
            .photos
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(format!("no photo {id}")))?;
        let src = self.artifacts().uploads_dir().join(&photo.stored_filename);
        let job_id = JobId::new(self.ids.next());
        let stdout = self
            .invoker
            .invoke(&job_id, AUTO_CROP_SCRIPT, &[src.to_string_lossy().into_owned()])
            .await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| ServiceError::Validation(format!("auto-crop worker returned bad JSON: {e}")))
    }

    /// `GET /steps`.
    pub fn steps(&self) -> BTreeMap<StageKey, PublicStageInfo> {
        self.scheduler.registry().steps()
    }

    /// `POST /jobs`.
    pub fn create_jobs(&self, requests: Vec<CreateJobRequest>) -> Result<Vec<Job>, ServiceError> {
        let status = self.status();
        if !status.ai_ready {
            return Err(ServiceError::NotReady(
                "worker environment is not installed".to_string(),
            ));
        }

        let mut configs = Vec::with_capacity(requests.len());
        for request in requests {
            let photo = self
                .photos
                .lock()
                .get(&request.photo_id)
                .cloned()
                .ok_or_else(|| {
                    ServiceError::Validation(format!("unknown photoId {}", request.photo_id))
                })?;
            for key in &request.steps {
                if self.scheduler.registry().get(*key).is_none() {
                    return Err(ServiceError::Validation(format!("unknown stage {key}")));
                }
            }
            let initial_mask_path = match request.mask_data_url {
                Some(data_url) => {
                    let bytes = rst_engine::decode_data_url(&data_url)?;
                    let path = self.artifacts().alloc_mask_path();
                    std::fs::write(&path, &bytes).map_err(|source| ArtifactError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    Some(path)
                }
                None => None,
            };
            configs.push(JobConfig {
                id: JobId::new(self.ids.next()),
                photo_id: photo.id.clone(),
                photo_name: photo.display_name.clone(),
                original_path: self.artifacts().uploads_dir().join(&photo.stored_filename),
                steps: request.steps,
                options: request.options,
                priority: 0,
                created_at_ms: self.clock.epoch_ms(),
                initial_crop_rect: request.crop_rect,
                initial_mask_path,
            });
        }
        Ok(self.scheduler.create_jobs(configs))
    }

    /// `GET /jobs`.
    pub fn list_jobs(&self) -> Vec<Job> {
        self.scheduler.list_jobs()
    }

    /// `GET /jobs/:id`.
    pub fn get_job(&self, id: &JobId) -> Result<Job, ServiceError> {
        Ok(self.scheduler.get_job(id)?)
    }

    /// `POST /jobs/:id/input`.
    pub fn submit_input(
        &self,
        id: &JobId,
        crop_rect: Option<String>,
        mask_data_url: Option<String>,
    ) -> Result<(), ServiceError> {
        Ok(self.scheduler.submit_input(id, crop_rect, mask_data_url)?)
    }

    /// `POST /jobs/:id/skip`.
    pub fn skip_step(&self, id: &JobId) -> Result<(), ServiceError> {
        Ok(self.scheduler.skip_step(id)?)
    }

    /// `POST /jobs/:id/back`.
    pub fn rewind(&self, id: &JobId) -> Result<(), ServiceError> {
        Ok(self.scheduler.rewind(id)?)
    }

    /// `POST /jobs/:id/retry`.
    pub fn retry(&self, id: &JobId, model: Option<String>) -> Result<(), ServiceError> {
        Ok(self.scheduler.retry(id, model)?)
    }

    /// `POST /jobs/:id/skip-failed`.
    pub fn skip_failed(&self, id: &JobId) -> Result<(), ServiceError> {
        Ok(self.scheduler.skip_failed(id)?)
    }

    /// `POST /jobs/:id/cancel`.
    pub async fn cancel(&self, id: &JobId) -> Result<(), ServiceError> {
        Ok(self.scheduler.cancel(id).await?)
    }

    /// `POST /jobs/cancel-all`.
    pub async fn cancel_all(&self) -> usize {
        self.scheduler.cancel_all().await
    }

    /// `PUT /jobs/reorder`.
    pub fn reorder(&self, ordered_pending_ids: &[JobId]) {
        self.scheduler.reorder(ordered_pending_ids);
    }

    /// `GET /settings`.
    pub fn get_settings(&self) -> Settings {
        Settings {
            max_concurrent: self.scheduler.max_concurrent(),
            max_concurrent_limit: self.scheduler.max_concurrent_limit(),
        }
    }

    /// `PUT /settings`.
    pub fn set_max_concurrent(&self, value: u32) -> Result<Settings, ServiceError> {
        if !self.scheduler.set_max_concurrent(value) {
            return Err(ServiceError::Validation(format!(
                "maxConcurrent must be in [1, {}]",
                self.scheduler.max_concurrent_limit()
            )));
        }
        Ok(self.get_settings())
    }

    /// `GET /status`: a read-only view onto the (out-of-scope) environment
    /// bootstrap, surfaced through environment variables it writes.
    pub fn status(&self) -> StatusReport {
        StatusReport {
            ai_ready: env_flag("RST_AI_READY", true),
            device: std::env::var("RST_DEVICE").unwrap_or_else(|_| "cpu".to_string()),
            setup_running: env_flag("RST_SETUP_RUNNING", false),
            setup_status: std::env::var("RST_SETUP_STATUS").unwrap_or_else(|_| "ready".to_string()),
            setup_error: std::env::var("RST_SETUP_ERROR").ok().filter(|s| !s.is_empty()),
        }
    }
}

fn env_flag(var: &str, default: bool) -> bool {
    std::env::var(var)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rst_adapters::{FakeInvoker, Scripted};
    use rst_core::{FakeClock, SequentialIdGen};
    use rst_engine::StageRegistry;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn service() -> (
        Service<FakeClock, SequentialIdGen>,
        Arc<FakeInvoker>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts =
            ArtifactStore::new(dir.path().join("uploads"), dir.path().join("results")).unwrap();
        let invoker = Arc::new(FakeInvoker::new());
        let scheduler = Scheduler::new(
            StageRegistry::new(),
            artifacts,
            invoker.clone(),
            FakeClock::new(),
            2,
            4,
            std::time::Duration::from_secs(10),
        );
        let service = Service::new(
            scheduler,
            Arc::new(parking_lot::Mutex::new(PhotoStore::new())),
            invoker.clone(),
            SequentialIdGen::new("id"),
            FakeClock::new(),
        );
        (service, invoker, dir)
    }

    #[test]
    fn upload_rejects_disallowed_extension() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, _invoker, _dir) = service();
        let err = service
            .upload_photos(vec![NewUpload {
                display_name: "evil.exe".to_string(),
                extension: "exe".to_string(),
                bytes: vec![1, 2, 3],
            }])
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn upload_rejects_oversized_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, _invoker, _dir) = service();
        let err = service
            .upload_photos(vec![NewUpload {
                display_name: "big.png".to_string(),
                extension: "png".to_string(),
                bytes: vec![0u8; MAX_UPLOAD_BYTES + 1],
            }])
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn upload_then_list_then_delete_round_trips() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, _invoker, _dir) = service();
        let created = service
            .upload_photos(vec![NewUpload {
                display_name: "sunset.jpg".to_string(),
                extension: "jpg".to_string(),
                bytes: b"fake jpeg bytes".to_vec(),
            }])
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(service.list_photos().len(), 1);

        service.delete_photo(&created[0].id).unwrap();
        assert!(service.list_photos().is_empty());
    }

    #[test]
    fn create_jobs_rejects_unknown_photo_id() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, _invoker, _dir) = service();
        let err = service
            .create_jobs(vec![CreateJobRequest {
                photo_id: PhotoId::new("ghost"),
                steps: vec![StageKey::FaceRestore],
                options: HashMap::new(),
                crop_rect: None,
                mask_data_url: None,
            }])
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn create_jobs_rejects_when_not_ready() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("RST_AI_READY", "false");
        let (service, _invoker, _dir) = service();
        let photo = service
            .upload_photos(vec![NewUpload {
                display_name: "sunset.jpg".to_string(),
                extension: "jpg".to_string(),
                bytes: b"data".to_vec(),
            }])
            .unwrap()
            .remove(0);
        let err = service
            .create_jobs(vec![CreateJobRequest {
                photo_id: photo.id,
                steps: vec![StageKey::FaceRestore],
                options: HashMap::new(),
                crop_rect: None,
                mask_data_url: None,
            }])
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotReady(_)));
        std::env::remove_var("RST_AI_READY");
    }

    #[tokio::test]
    async fn create_jobs_with_initial_crop_rect_does_not_pause() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, _invoker, _dir) = service();
        let photo = service
            .upload_photos(vec![NewUpload {
                display_name: "sunset.jpg".to_string(),
                extension: "jpg".to_string(),
                bytes: b"data".to_vec(),
            }])
            .unwrap()
            .remove(0);
        let jobs = service
            .create_jobs(vec![CreateJobRequest {
                photo_id: photo.id,
                steps: vec![StageKey::Crop],
                options: HashMap::new(),
                crop_rect: Some("{\"x\":0,\"y\":0,\"w\":10,\"h\":10}".to_string()),
                mask_data_url: None,
            }])
            .unwrap();
        assert_eq!(jobs[0].crop_rect.as_deref(), Some("{\"x\":0,\"y\":0,\"w\":10,\"h\":10}"));
    }

    #[tokio::test]
    async fn auto_crop_parses_worker_json_response() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, invoker, _dir) = service();
        let photo = service
            .upload_photos(vec![NewUpload {
                display_name: "sunset.jpg".to_string(),
                extension: "jpg".to_string(),
                bytes: b"data".to_vec(),
            }])
            .unwrap()
            .remove(0);

        invoker.push_response(
            AUTO_CROP_SCRIPT,
            Scripted::Success(br#"{"x":1,"y":2,"w":30,"h":40}"#.to_vec()),
        );
        let rect = service.auto_crop(&photo.id).await.unwrap();
        assert_eq!(rect.x, 1);
        assert_eq!(rect.y, 2);
        assert_eq!(rect.w, 30);
        assert_eq!(rect.h, 40);
    }

    #[tokio::test]
    async fn crop_photo_invokes_worker_and_creates_a_new_photo() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, invoker, _dir) = service();
        let photo = service
            .upload_photos(vec![NewUpload {
                display_name: "sunset.jpg".to_string(),
                extension: "jpg".to_string(),
                bytes: b"data".to_vec(),
            }])
            .unwrap()
            .remove(0);

        invoker.push_response(CROP_SCRIPT, Scripted::Success(Vec::new()));
        let cropped = service.crop_photo(&photo.id, "{\"x\":0,\"y\":0,\"w\":5,\"h\":5}").await.unwrap();

        assert_ne!(cropped.id, photo.id);
        assert_eq!(service.list_photos().len(), 2);
        let calls = invoker.calls();
        assert_eq!(calls.last().unwrap().script, CROP_SCRIPT);
    }

    #[test]
    fn import_photo_copies_an_artifact_into_uploads() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, _invoker, _dir) = service();
        let results_file = service.artifacts().results_dir().join("restored.png");
        std::fs::write(&results_file, b"restored bytes").unwrap();
        let url = service.artifacts().path_to_url(&results_file).unwrap();

        let imported = service.import_photo(&url, "restored.png".to_string()).unwrap();
        assert_eq!(service.list_photos().len(), 1);
        let stored = service.artifacts().uploads_dir().join(&imported.stored_filename);
        assert_eq!(std::fs::read(stored).unwrap(), b"restored bytes");
    }

    #[test]
    fn settings_round_trip() {
        let _guard = ENV_LOCK.lock().unwrap();
        let (service, _invoker, _dir) = service();
        assert_eq!(service.get_settings().max_concurrent, 2);
        let updated = service.set_max_concurrent(3).unwrap();
        assert_eq!(updated.max_concurrent, 3);
        assert!(service.set_max_concurrent(0).is_err());
    }
}
