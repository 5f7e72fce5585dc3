// src/models/moderation.rs

//! Player moderation record (block, mute, hide avatar, ...).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Entity, EntityKind, Snapshot};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerModeration {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source_user_id: String,
    pub source_display_name: String,
    pub target_user_id: String,
    pub target_display_name: String,
    pub created: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for PlayerModeration {
    const KIND: EntityKind = EntityKind::PlayerModeration;

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
        Snapshot::PlayerModeration(Box::new(self))
    }
}
