//! Keyed entity caches with merge-diff and expire-then-sweep support.
//!
//! One [`EntityCache`] exists per entity kind. Records live in an
//! insertion-ordered map so that iteration follows the order the server
//! reported them in.
//!
//! ## Merge
//!
//! - First sight: the kind's default template overlaid with the payload.
//! - Later sights: snapshot scalar fields, overlay, recompute synthetic
//!   fields, clear `expired`, diff. A non-empty diff emits `*:UPDATED`.
//! - `location` is diffed as `[new, old, msAtOld]` and is the only path that
//!   moves `location_changed_at`.
//!
//! ## Reconciliation
//!
//! [`EntityCache::begin_pass`] marks records `expired`, upserts during the
//! pass clear the mark, and [`EntityCache::sweep`] deletes what is left.

mod diff;
mod record;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::bus::{Event, EventBus};
use crate::error::{AppError, Result};
use crate::models::{Entity, EntityKind};

pub use diff::{Changes, Diff, FieldChange, diff_scalars, scalar_fields};
pub use record::{Record, RecordMeta};

/// Where an upsert's payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Push event or a direct single-record fetch
    Live,
    /// A page of a reconciliation pass
    Pass(PassToken),
}

/// Handle for one expire-then-sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassToken {
    pub kind: EntityKind,
    /// Cache revision when the pass began
    pub started_revision: u64,
    pub started_at: DateTime<Utc>,
}

/// Result of one upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub id: String,
    pub created: bool,
    pub changes: Changes,
    /// A pass observation skipped because a live update is newer
    pub stale: bool,
}

pub struct EntityCache<E: Entity> {
    records: IndexMap<String, Record<E>>,
    /// secondary key -> id
    secondary: HashMap<String, String>,
    bus: Rc<EventBus>,
    revision: u64,
}

impl<E: Entity> EntityCache<E> {
    pub fn new(bus: Rc<EventBus>) -> Self {
        Self {
            records: IndexMap::new(),
            secondary: HashMap::new(),
            bus,
            revision: 0,
        }
    }

    /// Upsert a live (push or direct) observation.
    pub fn upsert(&mut self, json: &Value) -> Result<Upserted> {
        self.upsert_from(json, Origin::Live)
    }

    /// Insert or merge a JSON payload.
    pub fn upsert_from(&mut self, json: &Value, origin: Origin) -> Result<Upserted> {
        let patch = json
            .as_object()
            .ok_or_else(|| AppError::payload(format!("{} payload is not an object", E::KIND)))?;
        let id = patch
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::payload(format!("{} payload has no id", E::KIND)))?
            .to_string();

        let now = Utc::now();
        self.revision += 1;
        let revision = self.revision;

        let Some(record) = self.records.get_mut(&id) else {
            let mut data = overlay(&E::template(&id), patch);
            data.derive();
            let mut meta = RecordMeta::new(revision, now);
            if origin == Origin::Live {
                meta.live_revision = Some(revision);
            }
            let record = Record::new(data, meta);
            if let Some(key) = record.data.secondary_key() {
                self.secondary.insert(key.to_string(), id.clone());
            }
            let snapshot = record.data.clone().into_snapshot();
            self.records.insert(id.clone(), record);
            self.bus.emit(Event::Created { record: snapshot });
            return Ok(Upserted {
                id,
                created: true,
                changes: Changes::new(),
                stale: false,
            });
        };

        if let Origin::Pass(pass) = origin {
            let newer_live = record
                .meta
                .live_revision
                .is_some_and(|live| live > pass.started_revision);
            if newer_live {
                record.meta.expired = false;
                return Ok(Upserted {
                    id,
                    created: false,
                    changes: Changes::new(),
                    stale: true,
                });
            }
        }

        let before = scalar_fields(&serde_json::to_value(&record.data)?);
        let old_key = record.data.secondary_key().map(str::to_string);

        let mut data = overlay(&record.data, patch);
        data.carry_over(&record.data);
        data.derive();
        record.data = data;
        record.meta.expired = false;
        record.meta.revision = revision;
        record.meta.updated_at = now;
        if origin == Origin::Live {
            record.meta.live_revision = Some(revision);
        }
        record.refresh_location();

        let after = scalar_fields(&serde_json::to_value(&record.data)?);
        let mut changes = diff_scalars(&before, &after);
        if record.data.location_tag().is_some() {
            if let Some(change) = changes.get_mut("location") {
                let elapsed = now - record.meta.location_changed_at;
                change.elapsed_ms = Some(elapsed.num_milliseconds());
                record.meta.location_changed_at = now;
            }
        }

        let new_key = record.data.secondary_key().map(str::to_string);
        let snapshot = (!changes.is_empty()).then(|| record.data.clone().into_snapshot());

        if old_key != new_key {
            if let Some(key) = old_key {
                self.secondary.remove(&key);
            }
            if let Some(key) = new_key {
                self.secondary.insert(key, id.clone());
            }
        }

        if let Some(snapshot) = snapshot {
            self.bus.emit(Event::Updated {
                record: snapshot,
                changes: changes.clone(),
            });
        }

        Ok(Upserted {
            id,
            created: false,
            changes,
            stale: false,
        })
    }

    /// Remove a record and emit its deletion event. No-op if absent.
    pub fn mark_deleted(&mut self, id: &str) -> bool {
        let Some(mut record) = self.records.shift_remove(id) else {
            return false;
        };
        if let Some(key) = record.data.secondary_key() {
            if self.secondary.get(key).is_some_and(|owner| owner == id) {
                self.secondary.remove(key);
            }
        }
        record.meta.deleted = true;
        self.revision += 1;
        log::debug!("{} {} deleted", E::KIND, id);
        self.bus.emit(Event::Deleted {
            record: record.data.into_snapshot(),
        });
        true
    }

    /// Mark every record accepted by `filter` as expired and start a pass.
    pub fn begin_pass(&mut self, filter: impl Fn(&E) -> bool) -> PassToken {
        for record in self.records.values_mut() {
            if filter(&record.data) {
                record.meta.expired = true;
            }
        }
        PassToken {
            kind: E::KIND,
            started_revision: self.revision,
            started_at: Utc::now(),
        }
    }

    /// Delete every record still expired, except ones touched after the pass
    /// began. Returns the deleted ids.
    pub fn sweep(&mut self, pass: &PassToken) -> Vec<String> {
        let doomed: Vec<String> = self
            .records
            .values()
            .filter(|r| r.meta.expired && r.meta.revision <= pass.started_revision)
            .map(|r| r.id().to_string())
            .collect();

        for id in &doomed {
            self.mark_deleted(id);
        }
        doomed
    }

    /// Clear expiry marks after a failed pass without deleting anything.
    pub fn abandon_pass(&mut self, _pass: &PassToken) {
        for record in self.records.values_mut() {
            record.meta.expired = false;
        }
    }

    pub fn get(&self, id: &str) -> Option<&Record<E>> {
        self.records.get(id)
    }

    /// Mutable access for client-local fields. Does not diff or emit.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record<E>> {
        self.records.get_mut(id)
    }

    /// Lookup by secondary key (e.g. a favorite by the favorited object id).
    pub fn get_by_secondary(&self, key: &str) -> Option<&Record<E>> {
        self.secondary.get(key).and_then(|id| self.records.get(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Records in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &Record<E>> {
        self.records.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Record<E>> {
        self.records.values_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Mutate a shared cache with bus dispatch held until the borrow is
/// released, so handlers may read the cache that emitted.
pub fn mutate<E, R>(cache: &RefCell<EntityCache<E>>, f: impl FnOnce(&mut EntityCache<E>) -> R) -> R
where
    E: Entity,
{
    let bus = Rc::clone(&cache.borrow().bus);
    let _held = bus.hold();
    let result = f(&mut cache.borrow_mut());
    result
}

/// Overlay `patch` onto `current`. Never fails: a field whose value does not
/// fit the record type keeps its previous value.
fn overlay<E: Entity>(current: &E, patch: &Map<String, Value>) -> E {
    let mut base = match serde_json::to_value(current) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };

    let mut merged = base.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    if let Ok(data) = serde_json::from_value::<E>(Value::Object(merged)) {
        return data;
    }

    for (key, value) in patch {
        let previous = base.insert(key.clone(), value.clone());
        if serde_json::from_value::<E>(Value::Object(base.clone())).is_err() {
            log::warn!("{}: ignoring field '{}' with unexpected value {}", E::KIND, key, value);
            match previous {
                Some(prev) => base.insert(key.clone(), prev),
                None => base.remove(key),
            };
        }
    }
    serde_json::from_value(Value::Object(base)).unwrap_or_else(|_| current.clone())
}
