// SPDX-License-Identifier: MIT

//! Content-addressed filesystem namespace for uploads, stage outputs, and
//! user-supplied masks (spec.md §4.1).

use rst_core::JobId;
use std::path::{Path, PathBuf};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Extension forced on every stage output (spec.md §4.1).
pub const STAGE_OUTPUT_EXT: &str = "png";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("path {0} does not map to a known artifact URL")]
    NotFound(PathBuf),
}

/// Owns the uploads/results/masks directories and the URL naming scheme
/// (`/uploads/<name>`, `/results/<name>`).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    uploads_dir: PathBuf,
    results_dir: PathBuf,
}

impl ArtifactStore {
    /// Create the store, creating `uploads_dir`/`results_dir` (and a
    /// `masks` subdirectory of uploads) if missing.
    pub fn new(uploads_dir: PathBuf, results_dir: PathBuf) -> Result<Self, ArtifactError> {
        for dir in [&uploads_dir, &results_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(Self {
            uploads_dir,
            results_dir,
        })
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Allocate a fresh, globally-unique path under `uploads/` for a
    /// just-uploaded or just-imported photo, preserving its extension.
    pub fn alloc_upload_path(&self, original_extension: &str) -> PathBuf {
        let name = format!("{}.{}", uuid::Uuid::new_v4(), original_extension);
        self.uploads_dir.join(name)
    }

    /// Allocate a path under `uploads/` for a decoded mask image, named
    /// `mask_<8hex>.png` per spec.md §6.
    pub fn alloc_mask_path(&self) -> PathBuf {
        let hex = format!("{:08x}", uuid::Uuid::new_v4().as_u128() as u32);
        self.uploads_dir.join(format!("mask_{hex}.png"))
    }

    /// Build the deterministic output path for one stage of one job:
    /// `results/<sanitized(photo_name)>_<stage_prefix>_<job_short>.png`.
    pub fn stage_output_path(&self, photo_name: &str, stage_prefix: &str, job_id: &JobId) -> PathBuf {
        let filename = format!(
            "{}_{}_{}.{}",
            sanitize_filename(photo_name),
            stage_prefix,
            job_id.short(6),
            STAGE_OUTPUT_EXT
        );
        self.results_dir.join(filename)
    }

    /// Map an absolute path under `uploads/` or `results/` to its public
    /// URL form (`/uploads/<name>` or `/results/<name>`).
    pub fn path_to_url(&self, path: &Path) -> Result<String, ArtifactError> {
        if let Ok(rel) = path.strip_prefix(&self.uploads_dir) {
            return Ok(format!("/uploads/{}", rel.display()));
        }
        if let Ok(rel) = path.strip_prefix(&self.results_dir) {
            return Ok(format!("/results/{}", rel.display()));
        }
        Err(ArtifactError::NotFound(path.to_path_buf()))
    }

    /// Inverse of [`Self::path_to_url`]: map a `/uploads/<name>` or
    /// `/results/<name>` URL back to an absolute filesystem path.
    pub fn url_to_path(&self, url: &str) -> Result<PathBuf, ArtifactError> {
        if let Some(name) = url.strip_prefix("/uploads/") {
            return Ok(self.uploads_dir.join(name));
        }
        if let Some(name) = url.strip_prefix("/results/") {
            return Ok(self.results_dir.join(name));
        }
        Err(ArtifactError::NotFound(PathBuf::from(url)))
    }

    /// Delete a file, ignoring `NotFound` (another deletion path may have
    /// already removed it, e.g. a racing cleanup sweep).
    pub fn delete(&self, path: &Path) -> Result<(), ArtifactError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Sanitize a display name for use inside a filename: strip diacritics via
/// NFKD decomposition, replace any byte outside `[A-Za-z0-9._-]` with `_`,
/// collapse runs of `_`, and trim leading/trailing `_`.
pub fn sanitize_filename(name: &str) -> String {
    let decomposed: String = name.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let mut out = String::with_capacity(decomposed.len());
    let mut last_was_underscore = false;
    for c in decomposed.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32,
        0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF | 0xFE20..=0xFE2F)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        plain = { "sunset.jpg", "sunset.jpg" },
        spaces = { "my photo 1.jpg", "my_photo_1.jpg" },
        diacritics = { "café.png", "cafe.png" },
        symbols = { "a/b\\c:d", "a_b_c_d" },
        collapses_runs = { "a   b", "a_b" },
        trims_edges = { "  leading.jpg", "leading.jpg" },
    )]
    fn sanitizes_display_names(input: &str, expected: &str) {
        assert_eq!(sanitize_filename(input), expected);
    }

    #[test]
    fn stage_output_path_uses_sanitized_name_prefix_and_short_job_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("uploads"), dir.path().join("results"))
            .unwrap();
        let job_id = JobId::new("0123456789abcdef");
        let path = store.stage_output_path("My Café.jpg", "restored", &job_id);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "My_Cafe.jpg_restored_012345.png"
        );
    }

    #[test]
    fn path_to_url_and_back_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("uploads"), dir.path().join("results"))
            .unwrap();
        let path = store.uploads_dir().join("foo.png");
        let url = store.path_to_url(&path).unwrap();
        assert_eq!(url, "/uploads/foo.png");
        assert_eq!(store.url_to_path(&url).unwrap(), path);
    }

    #[test]
    fn delete_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("uploads"), dir.path().join("results"))
            .unwrap();
        let path = store.uploads_dir().join("nope.png");
        assert!(store.delete(&path).is_ok());
    }
}
