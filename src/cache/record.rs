//! Cached record wrapper and bookkeeping flags.

use chrono::{DateTime, Utc};

use crate::location::LocationContext;
use crate::models::Entity;

/// Client-side bookkeeping for one cached record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMeta {
    /// Set at reconciliation start, cleared when re-observed
    pub expired: bool,
    /// Only ever true on the copy handed out with a deletion event
    pub deleted: bool,
    /// Cache revision of the last mutation
    pub revision: u64,
    /// Cache revision of the last push (or direct) observation
    pub live_revision: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Moved only when the location field itself changes
    pub location_changed_at: DateTime<Utc>,
}

impl RecordMeta {
    pub(crate) fn new(revision: u64, now: DateTime<Utc>) -> Self {
        Self {
            expired: false,
            deleted: false,
            revision,
            live_revision: None,
            created_at: now,
            updated_at: now,
            location_changed_at: now,
        }
    }
}

/// A cached entity with its bookkeeping and parsed location.
#[derive(Debug, Clone)]
pub struct Record<E: Entity> {
    pub data: E,
    pub meta: RecordMeta,
    location: Option<LocationContext>,
}

impl<E: Entity> Record<E> {
    pub(crate) fn new(data: E, meta: RecordMeta) -> Self {
        let mut record = Self {
            data,
            meta,
            location: None,
        };
        record.refresh_location();
        record
    }

    pub fn id(&self) -> &str {
        self.data.id()
    }

    /// Parsed location, cached against the raw tag.
    pub fn location(&self) -> Option<&LocationContext> {
        self.location.as_ref()
    }

    /// Re-parse only when the raw tag differs from the cached one.
    pub(crate) fn refresh_location(&mut self) {
        let Some(tag) = self.data.location_tag() else {
            self.location = None;
            return;
        };
        let stale = self.location.as_ref().is_none_or(|ctx| ctx.tag != tag);
        if stale {
            self.location = Some(LocationContext::parse(tag));
        }
    }
}
