// SPDX-License-Identifier: MIT

//! Stage registry (spec.md §4.3): the ordered catalog of stage definitions.
//! Adding a stage is a pure data edit to [`StageRegistry::new`] — the
//! argument builder is the only per-stage polymorphism.

use rst_adapters::ArtifactStore;
use rst_core::{Job, ModelVariant, PublicStageInfo, StageKey};
use std::collections::BTreeMap;
use std::path::Path;

/// Static configuration plus the one piece of per-stage behavior
/// (`build_args`) the scheduler can't express as data.
pub trait StageDefinition: Send + Sync {
    fn key(&self) -> StageKey;
    fn human_name(&self) -> &str;
    fn worker_script(&self) -> &str;
    fn output_prefix(&self) -> &str;
    fn manual(&self) -> bool;

    /// True when this stage cannot build its argv without more
    /// user-supplied input than the job currently carries.
    fn needs_input(&self, job: &Job) -> bool;

    /// Build the worker script path and argv for one invocation.
    fn build_args(
        &self,
        input_path: &Path,
        output_path: &Path,
        job: &Job,
        model: Option<&str>,
    ) -> Vec<String>;

    /// Release any per-stage input the job carried for this invocation
    /// (e.g. delete the consumed mask file, null out `cropRect`).
    fn on_complete(&self, job: &mut Job, artifacts: &ArtifactStore);

    fn models(&self) -> &BTreeMap<String, ModelVariant> {
        static EMPTY: std::sync::OnceLock<BTreeMap<String, ModelVariant>> =
            std::sync::OnceLock::new();
        EMPTY.get_or_init(BTreeMap::new)
    }

    fn default_model(&self) -> Option<&str> {
        None
    }

    /// Name of an environment variable that must be non-empty for this
    /// stage to be exposed via `steps()`.
    fn requires_api_key(&self) -> Option<&str> {
        None
    }

    fn disabled(&self) -> bool {
        false
    }
}

/// The ordered catalog of stage definitions, immutable for the life of the
/// process.
pub struct StageRegistry {
    defs: BTreeMap<StageKey, Box<dyn StageDefinition>>,
}

impl StageRegistry {
    /// Build the registry with the production set of stage definitions.
    pub fn new() -> Self {
        let mut defs: BTreeMap<StageKey, Box<dyn StageDefinition>> = BTreeMap::new();
        for def in crate::stages::all() {
            defs.insert(def.key(), def);
        }
        Self { defs }
    }

    pub fn get(&self, key: StageKey) -> Option<&dyn StageDefinition> {
        self.defs.get(&key).map(|b| b.as_ref())
    }

    /// The set of manual stage keys, derived once.
    pub fn manual_keys(&self) -> std::collections::HashSet<StageKey> {
        self.defs
            .values()
            .filter(|d| d.manual())
            .map(|d| d.key())
            .collect()
    }

    /// Filtered, read-only view of every non-disabled, available stage
    /// (`GET /steps`'s contract).
    pub fn steps(&self) -> BTreeMap<StageKey, PublicStageInfo> {
        self.defs
            .values()
            .filter(|d| !d.disabled())
            .filter(|d| match d.requires_api_key() {
                Some(var) => std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false),
                None => true,
            })
            .map(|d| {
                (
                    d.key(),
                    PublicStageInfo {
                        key: d.key(),
                        human_name: d.human_name().to_string(),
                        manual: d.manual(),
                        output_prefix: d.output_prefix().to_string(),
                        models: d.models().clone(),
                        default_model: d.default_model().map(str::to_string),
                    },
                )
            })
            .collect()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_every_stage_key() {
        let registry = StageRegistry::new();
        for key in StageKey::ALL {
            assert!(registry.get(*key).is_some(), "missing stage {key}");
        }
    }

    #[test]
    fn manual_keys_are_exactly_crop_and_inpaint() {
        let registry = StageRegistry::new();
        let manual = registry.manual_keys();
        assert!(manual.contains(&StageKey::Crop));
        assert!(manual.contains(&StageKey::Inpaint));
        assert!(!manual.contains(&StageKey::FaceRestore));
        assert_eq!(manual.len(), 2);
    }

    #[test]
    fn steps_filters_out_stage_missing_required_api_key() {
        std::env::remove_var("RST_ONLINE_RESTORE_API_KEY");
        let registry = StageRegistry::new();
        let steps = registry.steps();
        assert!(!steps.contains_key(&StageKey::OnlineRestore));
    }

    #[test]
    fn steps_includes_stage_once_required_api_key_is_set() {
        std::env::set_var("RST_ONLINE_RESTORE_API_KEY", "secret");
        let registry = StageRegistry::new();
        let steps = registry.steps();
        assert!(steps.contains_key(&StageKey::OnlineRestore));
        std::env::remove_var("RST_ONLINE_RESTORE_API_KEY");
    }
}
