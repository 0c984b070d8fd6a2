// SPDX-License-Identifier: MIT

//! In-memory photo registry, analogous to [`crate::job_store::JobStore`].

use rst_adapters::ArtifactStore;
use rst_core::{Photo, PhotoId};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PhotoStore {
    photos: HashMap<PhotoId, Photo>,
}

impl PhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, photo: Photo) {
        self.photos.insert(photo.id.clone(), photo);
    }

    pub fn get(&self, id: &PhotoId) -> Option<&Photo> {
        self.photos.get(id)
    }

    pub fn remove(&mut self, id: &PhotoId) -> Option<Photo> {
        self.photos.remove(id)
    }

    pub fn clear(&mut self) {
        self.photos.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Photo> {
        self.photos.values()
    }

    /// Drop any photo whose backing file no longer exists under
    /// `artifacts`' uploads directory (spec.md §4.6).
    pub fn prune_missing(&mut self, artifacts: &ArtifactStore) -> usize {
        let missing: Vec<PhotoId> = self
            .photos
            .values()
            .filter(|p| !artifacts.uploads_dir().join(&p.stored_filename).exists())
            .map(|p| p.id.clone())
            .collect();
        let count = missing.len();
        for id in missing {
            self.photos.remove(&id);
        }
        count
    }
}
