// src/models/world.rs

//! World and avatar records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Entity, EntityKind, Snapshot};

/// A world.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct World {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author_id: String,
    pub author_name: String,
    pub image_url: String,
    pub thumbnail_image_url: String,
    pub release_status: String,
    pub capacity: u32,
    pub occupants: u32,
    pub favorites: u32,
    pub visits: u64,
    pub version: u32,
    pub tags: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for World {
    const KIND: EntityKind = EntityKind::World;

    fn template(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn into_snapshot(self) -> Snapshot {
        Snapshot::World(Box::new(self))
    }
}

/// An avatar.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Avatar {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author_id: String,
    pub author_name: String,
    pub image_url: String,
    pub thumbnail_image_url: String,
    pub release_status: String,
    pub version: u32,
    pub tags: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for Avatar {
    const KIND: EntityKind = EntityKind::Avatar;

    fn template(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn into_snapshot(self) -> Snapshot {
        Snapshot::Avatar(Box::new(self))
    }
}
