// src/registry.rs

//! Shared context: the event bus plus one cache per entity kind.
//!
//! Everything runs on one task, so caches sit behind `RefCell`s. Borrow a
//! cache only for the duration of a synchronous mutation, never across an
//! `.await`. Mutations that emit go through [`cache::mutate`], which holds
//! dispatch until the borrow is released, so handlers may read any cache.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::bus::EventBus;
use crate::cache::{self, EntityCache, Upserted};
use crate::error::Result;
use crate::models::{Avatar, Favorite, FavoriteGroup, Notification, PlayerModeration, User, World};

pub struct Registry {
    pub bus: Rc<EventBus>,
    pub users: RefCell<EntityCache<User>>,
    pub worlds: RefCell<EntityCache<World>>,
    pub avatars: RefCell<EntityCache<Avatar>>,
    pub notifications: RefCell<EntityCache<Notification>>,
    pub moderations: RefCell<EntityCache<PlayerModeration>>,
    pub favorites: RefCell<EntityCache<Favorite>>,
    pub favorite_groups: RefCell<EntityCache<FavoriteGroup>>,
    current_user_id: RefCell<Option<String>>,
}

impl Registry {
    pub fn new() -> Rc<Self> {
        Self::with_bus(Rc::new(EventBus::new()))
    }

    pub fn with_bus(bus: Rc<EventBus>) -> Rc<Self> {
        Rc::new(Self {
            users: RefCell::new(EntityCache::new(Rc::clone(&bus))),
            worlds: RefCell::new(EntityCache::new(Rc::clone(&bus))),
            avatars: RefCell::new(EntityCache::new(Rc::clone(&bus))),
            notifications: RefCell::new(EntityCache::new(Rc::clone(&bus))),
            moderations: RefCell::new(EntityCache::new(Rc::clone(&bus))),
            favorites: RefCell::new(EntityCache::new(Rc::clone(&bus))),
            favorite_groups: RefCell::new(EntityCache::new(Rc::clone(&bus))),
            current_user_id: RefCell::new(None),
            bus,
        })
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.current_user_id.borrow().clone()
    }

    pub fn set_current_user_id(&self, id: impl Into<String>) {
        *self.current_user_id.borrow_mut() = Some(id.into());
    }

    /// Upsert a user.
    pub fn upsert_user(&self, json: &Value) -> Result<Upserted> {
        cache::mutate(&self.users, |users| users.upsert(json))
    }

    /// Upsert a world.
    pub fn upsert_world(&self, json: &Value) -> Result<Upserted> {
        cache::mutate(&self.worlds, |worlds| worlds.upsert(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_caches_share_bus() {
        let registry = Registry::new();
        let seen = Rc::new(RefCell::new(0));
        let s = Rc::clone(&seen);
        registry.bus.on(
            crate::bus::Channel::Created(crate::models::EntityKind::World),
            move |_| {
                *s.borrow_mut() += 1;
                Ok(())
            },
        );
        registry.upsert_world(&json!({ "id": "wrld_1", "name": "Home" })).unwrap();
        assert_eq!(*seen.borrow(), 1);
        assert_eq!(registry.worlds.borrow().len(), 1);
    }

    #[test]
    fn test_handler_reads_emitting_cache() {
        let registry = Registry::new();
        let names = Rc::new(RefCell::new(Vec::new()));
        let (r, n) = (Rc::clone(&registry), Rc::clone(&names));
        registry.bus.on(
            crate::bus::Channel::Updated(crate::models::EntityKind::User),
            move |event| {
                if let crate::bus::Event::Updated { record, .. } = event {
                    let users = r.users.borrow();
                    let name = users.get(record.id()).map(|u| u.data.display_name.clone());
                    n.borrow_mut().push(name);
                }
                Ok(())
            },
        );

        registry.upsert_user(&json!({ "id": "usr_1", "displayName": "Alice" })).unwrap();
        registry.upsert_user(&json!({ "id": "usr_1", "displayName": "Alicia" })).unwrap();
        assert_eq!(*names.borrow(), vec![Some("Alicia".to_string())]);
    }

    #[test]
    fn test_current_user() {
        let registry = Registry::new();
        assert!(registry.current_user_id().is_none());
        registry.set_current_user_id("usr_me");
        assert_eq!(registry.current_user_id().as_deref(), Some("usr_me"));
    }
}
