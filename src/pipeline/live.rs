//! Push event routing.
//!
//! Every push event type is mapped onto the cache operation the pull path
//! would perform for the same state, so both paths converge on one record.
//! Redelivered events are dropped by comparing a fingerprint of the payload
//! against the last one applied for the same subject (user, notification,
//! favorite).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::api::PushMessage;
use crate::bus::Event;
use crate::cache;
use crate::error::{AppError, Result};
use crate::location::LocationContext;
use crate::registry::Registry;

/// What the router did with one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Applied,
    /// Same payload as the last one applied for this subject
    Duplicate,
    /// Unknown event type
    Ignored,
}

pub struct LiveEventRouter {
    registry: Rc<Registry>,
    /// subject key -> fingerprint of the last applied message
    last_applied: RefCell<HashMap<String, String>>,
}

impl LiveEventRouter {
    pub fn new(registry: Rc<Registry>) -> Self {
        Self {
            registry,
            last_applied: RefCell::new(HashMap::new()),
        }
    }

    /// Apply one push message.
    pub fn route(&self, message: &PushMessage) -> Result<Routed> {
        let Some(subject) = subject_key(message) else {
            if is_known(&message.kind) {
                return Err(AppError::payload(format!(
                    "{} event without a subject id",
                    message.kind
                )));
            }
            log::debug!("Ignoring push event '{}'", message.kind);
            return Ok(Routed::Ignored);
        };

        let print = fingerprint(message);
        if self.last_applied.borrow().get(&subject) == Some(&print) {
            log::debug!("Dropping redelivered {} for {}", message.kind, subject);
            return Ok(Routed::Duplicate);
        }

        self.apply(message)?;
        self.last_applied.borrow_mut().insert(subject, print);
        Ok(Routed::Applied)
    }

    /// Forget all fingerprints, e.g. after the stream reconnects.
    pub fn reset(&self) {
        self.last_applied.borrow_mut().clear();
    }

    fn apply(&self, message: &PushMessage) -> Result<()> {
        let content = &message.content;
        match message.kind.as_str() {
            "friend-add" => {
                let patch = user_patch(content, [("isFriend", json!(true))])?;
                let id = self.registry.upsert_user(&patch)?.id;
                self.emit_friend_add(&id);
            }
            "friend-delete" => {
                let user_id = required_str(content, "userId")?;
                if self.registry.users.borrow().contains(user_id) {
                    self.registry
                        .upsert_user(&json!({ "id": user_id, "isFriend": false }))?;
                }
                self.registry.bus.emit(Event::FriendDelete {
                    user_id: user_id.to_string(),
                });
            }
            "friend-online" | "friend-location" => {
                let location = content
                    .get("location")
                    .and_then(Value::as_str)
                    .unwrap_or("private")
                    .to_string();
                let mut fields = vec![
                    ("state", json!("online")),
                    ("location", json!(location)),
                ];
                for key in ["travelingToLocation", "worldId", "platform"] {
                    if let Some(value) = content.get(key) {
                        fields.push((key, value.clone()));
                    }
                }
                self.observe_world(content, &location)?;
                self.registry.upsert_user(&user_patch(content, fields)?)?;
            }
            "friend-active" => {
                let patch = user_patch(
                    content,
                    [("state", json!("active")), ("location", json!("offline"))],
                )?;
                self.registry.upsert_user(&patch)?;
            }
            "friend-offline" => {
                let patch = user_patch(
                    content,
                    [("state", json!("offline")), ("location", json!("offline"))],
                )?;
                self.registry.upsert_user(&patch)?;
            }
            "friend-update" => {
                self.registry.upsert_user(&user_patch(content, [])?)?;
            }
            "user-update" => {
                let upserted = self.registry.upsert_user(&user_patch(content, [])?)?;
                self.registry.set_current_user_id(upserted.id);
            }
            "user-location" => {
                let location = required_str(content, "location")?.to_string();
                self.observe_world(content, &location)?;
                let patch = user_patch(content, [("location", json!(location))])?;
                self.registry.upsert_user(&patch)?;
            }
            "notification" | "notification-v2" => {
                cache::mutate(&self.registry.notifications, |n| n.upsert(content))?;
            }
            "notification-v2-update" => {
                let id = required_str(content, "id")?;
                let mut patch = content
                    .get("updates")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                patch.insert("id".into(), json!(id));
                cache::mutate(&self.registry.notifications, |n| {
                    n.upsert(&Value::Object(patch))
                })?;
            }
            "see-notification" => {
                let id = subject_id(content).ok_or_else(|| missing("id"))?;
                let cached = self.registry.notifications.borrow().contains(id);
                if cached {
                    cache::mutate(&self.registry.notifications, |n| {
                        n.upsert(&json!({ "id": id, "seen": true }))
                    })?;
                }
            }
            "hide-notification" => {
                let id = subject_id(content).ok_or_else(|| missing("id"))?;
                cache::mutate(&self.registry.notifications, |n| n.mark_deleted(id));
            }
            "notification-v2-delete" => {
                let ids = content
                    .get("ids")
                    .and_then(Value::as_array)
                    .ok_or_else(|| missing("ids"))?;
                cache::mutate(&self.registry.notifications, |n| {
                    for id in ids.iter().filter_map(Value::as_str) {
                        n.mark_deleted(id);
                    }
                });
            }
            "favorite-added" => {
                let favorite = content.get("favorite").unwrap_or(content);
                cache::mutate(&self.registry.favorites, |f| f.upsert(favorite))?;
            }
            "favorite-removed" => {
                let id = match subject_id(content) {
                    Some(id) => Some(id.to_string()),
                    None => content
                        .get("favoriteId")
                        .and_then(Value::as_str)
                        .and_then(|target| {
                            self.registry
                                .favorites
                                .borrow()
                                .get_by_secondary(target)
                                .map(|record| record.id().to_string())
                        }),
                };
                if let Some(id) = id {
                    cache::mutate(&self.registry.favorites, |f| f.mark_deleted(&id));
                }
            }
            other => log::debug!("No mapping for push event '{}'", other),
        }
        Ok(())
    }

    fn emit_friend_add(&self, user_id: &str) {
        let user = self
            .registry
            .users
            .borrow()
            .get(user_id)
            .map(|record| Box::new(record.data.clone()));
        if let Some(user) = user {
            self.registry.bus.emit(Event::FriendAdd { user });
        }
    }

    /// Upsert the world a joinable location points at. Uses the embedded
    /// world object when present, else a bare stub for an unknown world.
    fn observe_world(&self, content: &Value, location: &str) -> Result<()> {
        let ctx = LocationContext::parse(location);
        if !ctx.has_world() {
            return Ok(());
        }
        if let Some(world) = content.get("world").filter(|w| w.get("id").is_some()) {
            self.registry.upsert_world(world)?;
            return Ok(());
        }
        let known = self.registry.worlds.borrow().contains(&ctx.world_id);
        if !known {
            self.registry.upsert_world(&json!({ "id": ctx.world_id }))?;
        }
        Ok(())
    }
}

const USER_EVENTS: &[&str] = &[
    "friend-add",
    "friend-delete",
    "friend-online",
    "friend-active",
    "friend-offline",
    "friend-update",
    "friend-location",
    "user-update",
    "user-location",
];

const NOTIFICATION_EVENTS: &[&str] = &[
    "notification",
    "notification-v2",
    "notification-v2-update",
    "notification-v2-delete",
    "see-notification",
    "hide-notification",
];

const FAVORITE_EVENTS: &[&str] = &["favorite-added", "favorite-removed"];

fn is_known(kind: &str) -> bool {
    USER_EVENTS.contains(&kind) || NOTIFICATION_EVENTS.contains(&kind) || FAVORITE_EVENTS.contains(&kind)
}

/// Key of the entity a message is about, used for redelivery detection.
fn subject_key(message: &PushMessage) -> Option<String> {
    let content = &message.content;
    let kind = message.kind.as_str();
    if USER_EVENTS.contains(&kind) {
        let id = content.get("userId").and_then(Value::as_str)?;
        return Some(format!("user:{id}"));
    }
    if kind == "notification-v2-delete" {
        let ids: Vec<&str> = content
            .get("ids")?
            .as_array()?
            .iter()
            .filter_map(Value::as_str)
            .collect();
        return Some(format!("notification:{}", ids.join(",")));
    }
    if NOTIFICATION_EVENTS.contains(&kind) {
        return subject_id(content).map(|id| format!("notification:{id}"));
    }
    if FAVORITE_EVENTS.contains(&kind) {
        let favorite = content.get("favorite").unwrap_or(content);
        let id = subject_id(favorite)
            .or_else(|| favorite.get("favoriteId").and_then(Value::as_str))?;
        return Some(format!("favorite:{id}"));
    }
    None
}

/// `content` itself when it is a bare id string, else `content.id`.
fn subject_id(content: &Value) -> Option<&str> {
    content
        .as_str()
        .or_else(|| content.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
}

fn fingerprint(message: &PushMessage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.kind.as_bytes());
    hasher.update([0]);
    hasher.update(message.content.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn missing(field: &str) -> AppError {
    AppError::payload(format!("push event is missing '{field}'"))
}

fn required_str<'a>(content: &'a Value, field: &str) -> Result<&'a str> {
    content
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| missing(field))
}

/// User payload for an event: the embedded `user` object (if any) with `id`
/// set from `userId`, then `fields` on top.
fn user_patch<'a>(
    content: &Value,
    fields: impl IntoIterator<Item = (&'a str, Value)>,
) -> Result<Value> {
    let user_id = required_str(content, "userId")?;
    let mut patch: Map<String, Value> = content
        .get("user")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    patch.insert("id".into(), json!(user_id));
    for (key, value) in fields {
        patch.insert(key.to_string(), value);
    }
    Ok(Value::Object(patch))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::bus::Channel;
    use crate::models::EntityKind;

    fn message(kind: &str, content: Value) -> PushMessage {
        PushMessage::new(kind, content)
    }

    fn counter(registry: &Registry, channel: Channel) -> Rc<Cell<usize>> {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        registry.bus.on(channel, move |_| {
            c.set(c.get() + 1);
            Ok(())
        });
        count
    }

    #[test]
    fn test_friend_online_upserts_user_and_world() {
        let registry = Registry::new();
        let router = LiveEventRouter::new(Rc::clone(&registry));

        let routed = router
            .route(&message(
                "friend-online",
                json!({
                    "userId": "usr_1",
                    "location": "wrld_1:123~hidden(usr_1)",
                    "user": { "displayName": "Alice", "status": "join me" }
                }),
            ))
            .unwrap();
        assert_eq!(routed, Routed::Applied);

        let users = registry.users.borrow();
        let user = &users.get("usr_1").unwrap().data;
        assert_eq!(user.state, "online");
        assert_eq!(user.status, "join me");
        assert_eq!(user.location, "wrld_1:123~hidden(usr_1)");
        assert!(registry.worlds.borrow().contains("wrld_1"));
    }

    #[test]
    fn test_private_location_skips_world() {
        let registry = Registry::new();
        let router = LiveEventRouter::new(Rc::clone(&registry));
        router
            .route(&message(
                "friend-location",
                json!({ "userId": "usr_1", "location": "private", "world": { "id": "wrld_9" } }),
            ))
            .unwrap();
        assert!(registry.worlds.borrow().is_empty());
    }

    #[test]
    fn test_redelivery_is_suppressed() {
        let registry = Registry::new();
        let router = LiveEventRouter::new(Rc::clone(&registry));
        let updates = counter(&registry, Channel::Updated(EntityKind::User));

        let online = message("friend-online", json!({ "userId": "usr_1", "location": "wrld_1:1" }));
        let offline = message("friend-offline", json!({ "userId": "usr_1" }));

        assert_eq!(router.route(&online).unwrap(), Routed::Applied);
        assert_eq!(router.route(&online).unwrap(), Routed::Duplicate);
        assert_eq!(router.route(&offline).unwrap(), Routed::Applied);
        // A real transition back is not a duplicate.
        assert_eq!(router.route(&online).unwrap(), Routed::Applied);
        assert_eq!(updates.get(), 2);
    }

    #[test]
    fn test_friend_add_and_delete_emit_roster_events() {
        let registry = Registry::new();
        let router = LiveEventRouter::new(Rc::clone(&registry));
        let adds = counter(&registry, Channel::FriendAdd);
        let deletes = counter(&registry, Channel::FriendDelete);

        router
            .route(&message(
                "friend-add",
                json!({ "userId": "usr_2", "user": { "displayName": "Bob" } }),
            ))
            .unwrap();
        assert!(registry.users.borrow().get("usr_2").unwrap().data.is_friend);

        router
            .route(&message("friend-delete", json!({ "userId": "usr_2" })))
            .unwrap();
        assert!(!registry.users.borrow().get("usr_2").unwrap().data.is_friend);
        assert_eq!((adds.get(), deletes.get()), (1, 1));
    }

    #[test]
    fn test_user_update_sets_current_user() {
        let registry = Registry::new();
        let router = LiveEventRouter::new(Rc::clone(&registry));
        router
            .route(&message(
                "user-update",
                json!({ "userId": "usr_me", "user": { "displayName": "Me" } }),
            ))
            .unwrap();
        assert_eq!(registry.current_user_id().as_deref(), Some("usr_me"));
    }

    #[test]
    fn test_notification_lifecycle() {
        let registry = Registry::new();
        let router = LiveEventRouter::new(Rc::clone(&registry));
        let deleted = counter(&registry, Channel::Deleted(EntityKind::Notification));

        for id in ["not_1", "not_2", "not_3"] {
            router
                .route(&message("notification", json!({ "id": id, "type": "invite" })))
                .unwrap();
        }
        router
            .route(&message("see-notification", json!("not_1")))
            .unwrap();
        assert!(registry.notifications.borrow().get("not_1").unwrap().data.seen);

        router
            .route(&message(
                "notification-v2-update",
                json!({ "id": "not_2", "updates": { "message": "edited" } }),
            ))
            .unwrap();
        assert_eq!(
            registry.notifications.borrow().get("not_2").unwrap().data.message,
            "edited"
        );

        router
            .route(&message("hide-notification", json!("not_1")))
            .unwrap();
        router
            .route(&message("notification-v2-delete", json!({ "ids": ["not_2", "not_3"] })))
            .unwrap();
        assert!(registry.notifications.borrow().is_empty());
        assert_eq!(deleted.get(), 3);
    }

    #[test]
    fn test_favorite_removed_by_target_id() {
        let registry = Registry::new();
        let router = LiveEventRouter::new(Rc::clone(&registry));
        router
            .route(&message(
                "favorite-added",
                json!({ "id": "fvrt_1", "type": "friend", "favoriteId": "usr_1", "tags": ["group_0"] }),
            ))
            .unwrap();
        assert_eq!(registry.favorites.borrow().len(), 1);

        router
            .route(&message("favorite-removed", json!({ "favoriteId": "usr_1" })))
            .unwrap();
        assert!(registry.favorites.borrow().is_empty());
    }

    #[test]
    fn test_unknown_and_malformed_events() {
        let registry = Registry::new();
        let router = LiveEventRouter::new(registry);
        assert_eq!(
            router.route(&message("content-refresh", json!({}))).unwrap(),
            Routed::Ignored
        );
        assert!(router.route(&message("friend-online", json!({}))).is_err());
    }
}
