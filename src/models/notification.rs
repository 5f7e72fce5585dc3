// src/models/notification.rs

//! Notification record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Entity, EntityKind, Snapshot};

/// A notification addressed to the current user.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sender_user_id: String,
    pub sender_username: String,
    pub receiver_user_id: String,
    pub message: String,
    /// Type-specific payload, kept opaque
    pub details: Value,
    pub seen: bool,
    #[serde(rename = "created_at")]
    pub created_at: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for Notification {
    const KIND: EntityKind = EntityKind::Notification;

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
        Snapshot::Notification(Box::new(self))
    }
}
