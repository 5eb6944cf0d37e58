use serde::{Deserialize, Serialize};

use super::ids::TrackId;
use super::resolver;
use crate::error::QueueError;

/// One playable unit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub source_url: String,
    pub requested_by: String,
}

impl Track {
    /// Resolve `source_url` and build the track; fails with `InvalidUrl`.
    pub fn from_url(source_url: &str, requested_by: impl Into<String>) -> Result<Self, QueueError> {
        let source_url = source_url.trim();
        let id = resolver::resolve(source_url)?;
        Ok(Self {
            id,
            source_url: source_url.to_owned(),
            requested_by: requested_by.into(),
        })
    }
}
