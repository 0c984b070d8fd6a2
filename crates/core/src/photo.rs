// SPDX-License-Identifier: MIT

//! Photo data model.

use crate::id::PhotoId;
use serde::{Deserialize, Serialize};

/// An uploaded or imported image. Created on upload or on "import result as
/// photo"; destroyed on explicit delete, bulk clear, or when its backing
/// file is swept by the cleanup sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    /// Opaque, globally-unique stored filename under the uploads directory.
    pub stored_filename: String,
    /// Display name as uploaded by the user.
    pub display_name: String,
    pub created_at_ms: u64,
}

impl Photo {
    pub fn new(
        id: PhotoId,
        stored_filename: impl Into<String>,
        display_name: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            stored_filename: stored_filename.into(),
            display_name: display_name.into(),
            created_at_ms,
        }
    }
}
