// src/models/user.rs

//! User record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Entity, EntityKind, Snapshot};

/// Trust classification derived from a user's system tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrustLevel {
    #[default]
    Visitor,
    #[serde(rename = "New User")]
    NewUser,
    User,
    #[serde(rename = "Known User")]
    KnownUser,
    #[serde(rename = "Trusted User")]
    TrustedUser,
}

impl TrustLevel {
    /// Highest trust tag wins.
    pub fn from_tags(tags: &[String]) -> Self {
        let has = |tag: &str| tags.iter().any(|t| t == tag);
        if has("system_trust_veteran") {
            TrustLevel::TrustedUser
        } else if has("system_trust_trusted") {
            TrustLevel::KnownUser
        } else if has("system_trust_known") {
            TrustLevel::User
        } else if has("system_trust_basic") {
            TrustLevel::NewUser
        } else {
            TrustLevel::Visitor
        }
    }
}

/// A user as reported by the service.
///
/// | field | default |
/// |---|---|
/// | `displayName` | `""` |
/// | `status` | `"offline"` |
/// | `state` | `"offline"` |
/// | `location` | `"offline"` |
/// | `isFriend` | `false` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub bio: String,
    pub status: String,
    pub status_description: String,
    /// Presence: `online`, `active` or `offline`
    pub state: String,
    pub location: String,
    pub traveling_to_location: String,
    pub world_id: String,
    pub current_avatar_image_url: String,
    pub current_avatar_thumbnail_image_url: String,
    pub user_icon: String,
    pub profile_pic_override: String,
    pub platform: String,
    pub last_login: String,
    pub developer_type: String,
    pub is_friend: bool,
    pub tags: Vec<String>,

    // Synthetic
    pub trust_level: TrustLevel,
    pub is_moderator: bool,
    pub is_troll: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: String::new(),
            display_name: String::new(),
            bio: String::new(),
            status: "offline".into(),
            status_description: String::new(),
            state: "offline".into(),
            location: "offline".into(),
            traveling_to_location: String::new(),
            world_id: String::new(),
            current_avatar_image_url: String::new(),
            current_avatar_thumbnail_image_url: String::new(),
            user_icon: String::new(),
            profile_pic_override: String::new(),
            platform: String::new(),
            last_login: String::new(),
            developer_type: String::new(),
            is_friend: false,
            tags: Vec::new(),
            trust_level: TrustLevel::Visitor,
            is_moderator: false,
            is_troll: false,
            extra: Map::new(),
        }
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn template(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn derive(&mut self) {
        self.trust_level = TrustLevel::from_tags(&self.tags);
        self.is_moderator = self.developer_type == "internal"
            || self.tags.iter().any(|t| t == "admin_moderator");
        self.is_troll = self
            .tags
            .iter()
            .any(|t| t == "system_troll" || t == "system_probable_troll");
    }

    fn location_tag(&self) -> Option<&str> {
        Some(&self.location)
    }

    fn into_snapshot(self) -> Snapshot {
        Snapshot::User(Box::new(self))
    }
}
