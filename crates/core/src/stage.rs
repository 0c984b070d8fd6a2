// SPDX-License-Identifier: MIT

//! Stage keys and model-variant metadata shared between the registry
//! (`rst-engine`) and the data model (`rst-core::job`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of pipeline stages. Adding a stage is a data edit to the
/// registry, not a change to this enum's consumers — the argument builder is
/// the only per-stage polymorphism (see `rst-engine::registry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    Crop,
    Inpaint,
    SpotRemoval,
    ScratchRemoval,
    FaceRestore,
    Colorize,
    Upscale,
    OnlineRestore,
}

impl StageKey {
    /// All known stage keys, in no particular scheduling order (a job's
    /// `steps` list determines pipeline order, not this slice).
    pub const ALL: &'static [StageKey] = &[
        StageKey::Crop,
        StageKey::Inpaint,
        StageKey::SpotRemoval,
        StageKey::ScratchRemoval,
        StageKey::FaceRestore,
        StageKey::Colorize,
        StageKey::Upscale,
        StageKey::OnlineRestore,
    ];

    /// Stable wire/string form, also used to build output filenames and to
    /// key the `options` map.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::Crop => "crop",
            StageKey::Inpaint => "inpaint",
            StageKey::SpotRemoval => "spot_removal",
            StageKey::ScratchRemoval => "scratch_removal",
            StageKey::FaceRestore => "face_restore",
            StageKey::Colorize => "colorize",
            StageKey::Upscale => "upscale",
            StageKey::OnlineRestore => "online_restore",
        }
    }

    /// True for stages that cannot build their argv without a human-supplied
    /// crop rectangle or mask (crop, inpaint).
    pub fn is_manual(&self) -> bool {
        matches!(self, StageKey::Crop | StageKey::Inpaint)
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Description of one selectable model variant for a stage (e.g. colorize's
/// "ddcolor" vs "deoldify").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVariant {
    pub name: String,
    pub description: String,
}

/// Filtered, read-only view of a [`StageDefinition`] as exposed by
/// `GET /steps`. Hides `buildArgs`/`onComplete`/`needsInput`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicStageInfo {
    pub key: StageKey,
    pub human_name: String,
    pub manual: bool,
    pub output_prefix: String,
    pub models: std::collections::BTreeMap<String, ModelVariant>,
    pub default_model: Option<String>,
}
