// src/models/favorite.rs

//! Favorite and favorite group records.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Entity, EntityKind, Snapshot};

/// What a favorite (or favorite group) points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FavoriteType {
    Friend,
    World,
    Avatar,
    #[default]
    #[serde(other)]
    Unknown,
}

impl FavoriteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FavoriteType::Friend => "friend",
            FavoriteType::World => "world",
            FavoriteType::Avatar => "avatar",
            FavoriteType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FavoriteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group lookup key shared by favorites and groups: `type:name`.
pub fn group_key(kind: FavoriteType, name: &str) -> String {
    format!("{}:{}", kind, name)
}

/// A single favorited user, world or avatar.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Favorite {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FavoriteType,
    /// Id of the favorited object
    pub favorite_id: String,
    /// First tag names the group the favorite belongs to
    pub tags: Vec<String>,

    // Synthetic
    pub group_key: String,

    /// Bound group slot, recomputed by the binder. Not part of the wire form.
    #[serde(skip)]
    pub group_ref: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for Favorite {
    const KIND: EntityKind = EntityKind::Favorite;

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
        self.group_key = match self.tags.first() {
            Some(tag) => group_key(self.kind, tag),
            None => String::new(),
        };
    }

    fn carry_over(&mut self, previous: &Self) {
        self.group_ref = previous.group_ref.clone();
    }

    fn secondary_key(&self) -> Option<&str> {
        (!self.favorite_id.is_empty()).then_some(self.favorite_id.as_str())
    }

    fn into_snapshot(self) -> Snapshot {
        Snapshot::Favorite(Box::new(self))
    }
}

/// A named favorite group as the server reports it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FavoriteGroup {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: FavoriteType,
    pub visibility: String,
    pub tags: Vec<String>,

    // Synthetic
    pub key: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Entity for FavoriteGroup {
    const KIND: EntityKind = EntityKind::FavoriteGroup;

    fn template(id: &str) -> Self {
        Self {
            id: id.to_string(),
            visibility: "private".into(),
            ..Self::default()
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn derive(&mut self) {
        self.key = group_key(self.kind, &self.name);
    }

    fn into_snapshot(self) -> Snapshot {
        Snapshot::FavoriteGroup(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_favorite_group_key() {
        let json = serde_json::json!({
            "id": "fvrt_1",
            "type": "friend",
            "favoriteId": "usr_1",
            "tags": ["group_1"]
        });
        let mut fav: Favorite = serde_json::from_value(json).unwrap();
        fav.derive();
        assert_eq!(fav.group_key, "friend:group_1");
        assert_eq!(fav.secondary_key(), Some("usr_1"));
    }

    #[test]
    fn test_unknown_type() {
        let json = serde_json::json!({ "id": "fvgrp_1", "type": "emoji", "name": "x" });
        let group: FavoriteGroup = serde_json::from_value(json).unwrap();
        assert_eq!(group.kind, FavoriteType::Unknown);
    }

    #[test]
    fn test_group_ref_not_serialized() {
        let mut fav = Favorite::template("fvrt_1");
        fav.group_ref = Some("friend#0".into());
        let value = serde_json::to_value(&fav).unwrap();
        assert!(value.get("groupRef").is_none());
    }
}
