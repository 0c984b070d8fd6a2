// SPDX-License-Identifier: MIT

//! Concrete stage definitions. Each struct is static configuration plus one
//! pure `build_args` function — the registry's only per-stage polymorphism.

use crate::registry::StageDefinition;
use rst_adapters::ArtifactStore;
use rst_core::{Job, ModelVariant, StageKey};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// The production stage set, in no particular order (a job's own `steps`
/// list determines pipeline order).
pub fn all() -> Vec<Box<dyn StageDefinition>> {
    vec![
        Box::new(Crop),
        Box::new(Inpaint),
        Box::new(SpotRemoval),
        Box::new(ScratchRemoval),
        Box::new(FaceRestore),
        Box::new(Colorize),
        Box::new(Upscale),
        Box::new(OnlineRestore),
    ]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub struct Crop;

impl StageDefinition for Crop {
    fn key(&self) -> StageKey {
        StageKey::Crop
    }
    fn human_name(&self) -> &str {
        "Crop"
    }
    fn worker_script(&self) -> &str {
        "crop.py"
    }
    fn output_prefix(&self) -> &str {
        "crop"
    }
    fn manual(&self) -> bool {
        true
    }
    fn needs_input(&self, job: &Job) -> bool {
        job.crop_rect.is_none()
    }
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        job: &Job,
        _model: Option<&str>,
    ) -> Vec<String> {
        vec![
            path_arg(input_path),
            path_arg(output_path),
            job.crop_rect.clone().unwrap_or_default(),
        ]
    }
    fn on_complete(&self, job: &mut Job, _artifacts: &ArtifactStore) {
        job.crop_rect = None;
    }
}

pub struct Inpaint;

impl StageDefinition for Inpaint {
    fn key(&self) -> StageKey {
        StageKey::Inpaint
    }
    fn human_name(&self) -> &str {
        "Inpaint"
    }
    fn worker_script(&self) -> &str {
        "inpaint.py"
    }
    fn output_prefix(&self) -> &str {
        "inpaint"
    }
    fn manual(&self) -> bool {
        true
    }
    fn needs_input(&self, job: &Job) -> bool {
        job.mask_path.is_none()
    }
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        job: &Job,
        _model: Option<&str>,
    ) -> Vec<String> {
        let mask = job
            .mask_path
            .as_deref()
            .map(path_arg)
            .unwrap_or_default();
        vec![path_arg(input_path), path_arg(output_path), mask]
    }
    fn on_complete(&self, job: &mut Job, artifacts: &ArtifactStore) {
        if let Some(mask_path) = job.mask_path.take() {
            if let Err(err) = artifacts.delete(&mask_path) {
                tracing::warn!(?err, path = %mask_path.display(), "failed to delete consumed mask");
            }
        }
    }
}

pub struct SpotRemoval;

impl StageDefinition for SpotRemoval {
    fn key(&self) -> StageKey {
        StageKey::SpotRemoval
    }
    fn human_name(&self) -> &str {
        "Spot Removal"
    }
    fn worker_script(&self) -> &str {
        "spot_removal.py"
    }
    fn output_prefix(&self) -> &str {
        "spots"
    }
    fn manual(&self) -> bool {
        false
    }
    fn needs_input(&self, _job: &Job) -> bool {
        false
    }
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        _job: &Job,
        _model: Option<&str>,
    ) -> Vec<String> {
        vec![path_arg(input_path), path_arg(output_path)]
    }
    fn on_complete(&self, _job: &mut Job, _artifacts: &ArtifactStore) {}
}

pub struct ScratchRemoval;

impl StageDefinition for ScratchRemoval {
    fn key(&self) -> StageKey {
        StageKey::ScratchRemoval
    }
    fn human_name(&self) -> &str {
        "Scratch Removal"
    }
    fn worker_script(&self) -> &str {
        "scratch_removal.py"
    }
    fn output_prefix(&self) -> &str {
        "scratches"
    }
    fn manual(&self) -> bool {
        false
    }
    fn needs_input(&self, _job: &Job) -> bool {
        false
    }
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        _job: &Job,
        _model: Option<&str>,
    ) -> Vec<String> {
        vec![path_arg(input_path), path_arg(output_path)]
    }
    fn on_complete(&self, _job: &mut Job, _artifacts: &ArtifactStore) {}
}

pub struct FaceRestore;

impl StageDefinition for FaceRestore {
    fn key(&self) -> StageKey {
        StageKey::FaceRestore
    }
    fn human_name(&self) -> &str {
        "Face Restore"
    }
    fn worker_script(&self) -> &str {
        "face_restore.py"
    }
    fn output_prefix(&self) -> &str {
        "faces"
    }
    fn manual(&self) -> bool {
        false
    }
    fn needs_input(&self, _job: &Job) -> bool {
        false
    }
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        _job: &Job,
        _model: Option<&str>,
    ) -> Vec<String> {
        vec![path_arg(input_path), path_arg(output_path)]
    }
    fn on_complete(&self, _job: &mut Job, _artifacts: &ArtifactStore) {}
}

fn colorize_models() -> &'static BTreeMap<String, ModelVariant> {
    static MODELS: OnceLock<BTreeMap<String, ModelVariant>> = OnceLock::new();
    MODELS.get_or_init(|| {
        let mut m = BTreeMap::new();
        m.insert(
            "ddcolor".to_string(),
            ModelVariant {
                name: "DDColor".to_string(),
                description: "Higher-fidelity, slower colorization model".to_string(),
            },
        );
        m.insert(
            "deoldify".to_string(),
            ModelVariant {
                name: "DeOldify".to_string(),
                description: "Faster, warmer-toned colorization model".to_string(),
            },
        );
        m
    })
}

pub struct Colorize;

impl StageDefinition for Colorize {
    fn key(&self) -> StageKey {
        StageKey::Colorize
    }
    fn human_name(&self) -> &str {
        "Colorize"
    }
    fn worker_script(&self) -> &str {
        "colorize.py"
    }
    fn output_prefix(&self) -> &str {
        "colorized"
    }
    fn manual(&self) -> bool {
        false
    }
    fn needs_input(&self, _job: &Job) -> bool {
        false
    }
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        _job: &Job,
        model: Option<&str>,
    ) -> Vec<String> {
        let mut argv = vec![path_arg(input_path), path_arg(output_path)];
        if let Some(model) = model {
            argv.push("--model".to_string());
            argv.push(model.to_string());
        }
        argv
    }
    fn on_complete(&self, _job: &mut Job, _artifacts: &ArtifactStore) {}
    fn models(&self) -> &BTreeMap<String, ModelVariant> {
        colorize_models()
    }
    fn default_model(&self) -> Option<&str> {
        Some("ddcolor")
    }
}

fn upscale_models() -> &'static BTreeMap<String, ModelVariant> {
    static MODELS: OnceLock<BTreeMap<String, ModelVariant>> = OnceLock::new();
    MODELS.get_or_init(|| {
        let mut m = BTreeMap::new();
        m.insert(
            "compact".to_string(),
            ModelVariant {
                name: "Compact".to_string(),
                description: "Fast 2x real-ESRGAN variant".to_string(),
            },
        );
        m.insert(
            "general".to_string(),
            ModelVariant {
                name: "General".to_string(),
                description: "Higher-quality, slower 4x real-ESRGAN variant".to_string(),
            },
        );
        m
    })
}

pub struct Upscale;

impl StageDefinition for Upscale {
    fn key(&self) -> StageKey {
        StageKey::Upscale
    }
    fn human_name(&self) -> &str {
        "Upscale"
    }
    fn worker_script(&self) -> &str {
        "upscale.py"
    }
    fn output_prefix(&self) -> &str {
        "upscaled"
    }
    fn manual(&self) -> bool {
        false
    }
    fn needs_input(&self, _job: &Job) -> bool {
        false
    }
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        _job: &Job,
        model: Option<&str>,
    ) -> Vec<String> {
        let mut argv = vec![path_arg(input_path), path_arg(output_path)];
        if let Some(model) = model {
            argv.push("--model".to_string());
            argv.push(model.to_string());
        }
        argv
    }
    fn on_complete(&self, _job: &mut Job, _artifacts: &ArtifactStore) {}
    fn models(&self) -> &BTreeMap<String, ModelVariant> {
        upscale_models()
    }
    fn default_model(&self) -> Option<&str> {
        Some("compact")
    }
}

pub struct OnlineRestore;

impl StageDefinition for OnlineRestore {
    fn key(&self) -> StageKey {
        StageKey::OnlineRestore
    }
    fn human_name(&self) -> &str {
        "Online Restore"
    }
    fn worker_script(&self) -> &str {
        "online_restore.py"
    }
    fn output_prefix(&self) -> &str {
        "online"
    }
    fn manual(&self) -> bool {
        false
    }
    fn needs_input(&self, _job: &Job) -> bool {
        false
    }
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        _job: &Job,
        _model: Option<&str>,
    ) -> Vec<String> {
        vec![path_arg(input_path), path_arg(output_path)]
    }
    fn on_complete(&self, _job: &mut Job, _artifacts: &ArtifactStore) {}
    fn requires_api_key(&self) -> Option<&str> {
        Some("RST_ONLINE_RESTORE_API_KEY")
    }
}
