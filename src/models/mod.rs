// src/models/mod.rs

//! Domain models for the sync engine.
//!
//! One record type per cached entity kind, plus the application
//! configuration. Every record keeps fields it does not know about in a
//! flattened `extra` map so that nothing the server sends is lost on merge.

mod config;
mod favorite;
mod moderation;
mod notification;
mod user;
mod world;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Re-export all public types
pub use config::{
    ApiConfig, Config, FavoritesConfig, FeedConfig, LoggingConfig, SlotTable, StorageConfig,
    SyncConfig,
};
pub use favorite::{Favorite, FavoriteGroup, FavoriteType, group_key};
pub use moderation::PlayerModeration;
pub use notification::Notification;
pub use user::{TrustLevel, User};
pub use world::{Avatar, World};

/// The cached entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    World,
    Avatar,
    Notification,
    PlayerModeration,
    Favorite,
    FavoriteGroup,
}

impl EntityKind {
    /// Upper-case channel prefix, e.g. `USER` in `USER:UPDATED`.
    pub fn channel_prefix(&self) -> &'static str {
        match self {
            EntityKind::User => "USER",
            EntityKind::World => "WORLD",
            EntityKind::Avatar => "AVATAR",
            EntityKind::Notification => "NOTIFICATION",
            EntityKind::PlayerModeration => "MODERATION",
            EntityKind::Favorite => "FAVORITE",
            EntityKind::FavoriteGroup => "FAVORITE_GROUP",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.channel_prefix())
    }
}

/// A cacheable remote entity.
///
/// Remote fields are overwritten wholesale on every sight; synthetic fields
/// are recomputed by [`Entity::derive`] after each merge.
pub trait Entity: Serialize + DeserializeOwned + Clone + fmt::Debug + 'static {
    const KIND: EntityKind;

    /// Default record for an id seen for the first time.
    fn template(id: &str) -> Self;

    fn id(&self) -> &str;

    /// Recompute synthetic fields from remote fields.
    fn derive(&mut self) {}

    /// Copy client-local state that is not part of the wire form.
    fn carry_over(&mut self, _previous: &Self) {}

    /// Raw location tag, for kinds that have one.
    fn location_tag(&self) -> Option<&str> {
        None
    }

    /// Secondary lookup key (e.g. the favorited object's id).
    fn secondary_key(&self) -> Option<&str> {
        None
    }

    fn into_snapshot(self) -> Snapshot;
}

/// Owned copy of a record, carried on bus events.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    User(Box<User>),
    World(Box<World>),
    Avatar(Box<Avatar>),
    Notification(Box<Notification>),
    PlayerModeration(Box<PlayerModeration>),
    Favorite(Box<Favorite>),
    FavoriteGroup(Box<FavoriteGroup>),
}

impl Snapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            Snapshot::User(_) => EntityKind::User,
            Snapshot::World(_) => EntityKind::World,
            Snapshot::Avatar(_) => EntityKind::Avatar,
            Snapshot::Notification(_) => EntityKind::Notification,
            Snapshot::PlayerModeration(_) => EntityKind::PlayerModeration,
            Snapshot::Favorite(_) => EntityKind::Favorite,
            Snapshot::FavoriteGroup(_) => EntityKind::FavoriteGroup,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Snapshot::User(r) => r.id(),
            Snapshot::World(r) => r.id(),
            Snapshot::Avatar(r) => r.id(),
            Snapshot::Notification(r) => r.id(),
            Snapshot::PlayerModeration(r) => r.id(),
            Snapshot::Favorite(r) => r.id(),
            Snapshot::FavoriteGroup(r) => r.id(),
        }
    }
}
