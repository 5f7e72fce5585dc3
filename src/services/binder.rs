//! Favorite group slot binding.
//!
//! Server groups come back as an unordered set, but favorites are shown in a
//! fixed set of capacity-bounded slots per type. Binding runs in two passes
//! over the groups in cache order:
//!
//! 1. Exact name: bind a group to the unbound slot of its type carrying the
//!    same name.
//! 2. Fallback: bind each group still unbound to the first free slot of its
//!    type, renaming the slot after the group.
//!
//! The group cache preserves server response order, so the fallback pass is
//! deterministic for a given response.

use std::collections::HashMap;

use crate::cache::EntityCache;
use crate::models::{Favorite, FavoriteGroup, FavoriteType, FavoritesConfig, group_key};

/// One fixed client-side group slot.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSlot {
    /// Stable slot id, e.g. `friend#0`
    pub id: String,
    pub kind: FavoriteType,
    /// Name from configuration
    pub default_name: String,
    /// Current name; a fallback binding renames the slot
    pub name: String,
    pub display_name: String,
    pub capacity: usize,
    /// Favorites assigned by the last rebuild
    pub count: usize,
    /// Server group id, once bound
    pub bound_group: Option<String>,
}

impl GroupSlot {
    pub fn key(&self) -> String {
        group_key(self.kind, &self.name)
    }

    pub fn is_bound(&self) -> bool {
        self.bound_group.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    fn reset(&mut self) {
        self.name = self.default_name.clone();
        self.display_name = self.default_name.clone();
        self.count = 0;
        self.bound_group = None;
    }

    fn bind(&mut self, group: &FavoriteGroup) {
        self.name = group.name.clone();
        self.display_name = if group.display_name.is_empty() {
            group.name.clone()
        } else {
            group.display_name.clone()
        };
        self.bound_group = Some(group.id.clone());
    }
}

/// Outcome of one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindReport {
    pub exact: usize,
    pub fallback: usize,
    /// Server groups left without a slot
    pub unbound_groups: Vec<String>,
    pub assigned: usize,
    pub orphaned: usize,
}

#[derive(Debug, Clone)]
pub struct FavoriteGroupBinder {
    slots: Vec<GroupSlot>,
}

impl FavoriteGroupBinder {
    pub fn new(config: &FavoritesConfig) -> Self {
        let slots = config
            .tables()
            .into_iter()
            .flat_map(|table| {
                table.names.iter().enumerate().map(move |(i, name)| GroupSlot {
                    id: format!("{}#{}", table.kind, i),
                    kind: table.kind,
                    default_name: name.clone(),
                    name: name.clone(),
                    display_name: name.clone(),
                    capacity: table.capacity,
                    count: 0,
                    bound_group: None,
                })
            })
            .collect();
        Self { slots }
    }

    pub fn slots(&self) -> &[GroupSlot] {
        &self.slots
    }

    pub fn slots_of(&self, kind: FavoriteType) -> impl Iterator<Item = &GroupSlot> {
        self.slots.iter().filter(move |slot| slot.kind == kind)
    }

    pub fn slot(&self, slot_id: &str) -> Option<&GroupSlot> {
        self.slots.iter().find(|slot| slot.id == slot_id)
    }

    /// Slot a server group is bound to.
    pub fn slot_for_group(&self, group_id: &str) -> Option<&GroupSlot> {
        self.slots
            .iter()
            .find(|slot| slot.bound_group.as_deref() == Some(group_id))
    }

    /// Rebind every slot from scratch and reassign every favorite.
    pub fn rebuild(
        &mut self,
        groups: &EntityCache<FavoriteGroup>,
        favorites: &mut EntityCache<Favorite>,
    ) -> BindReport {
        let groups: Vec<&FavoriteGroup> = groups.values().map(|r| &r.data).collect();
        let mut report = self.bind(&groups);
        let (assigned, orphaned) = self.assign(favorites);
        report.assigned = assigned;
        report.orphaned = orphaned;
        log::info!(
            "Favorite groups bound: {} exact, {} fallback, {} unbound; {} favorites assigned, {} orphaned",
            report.exact,
            report.fallback,
            report.unbound_groups.len(),
            report.assigned,
            report.orphaned
        );
        report
    }

    /// Run both binding passes over `groups` in the given order.
    pub fn bind(&mut self, groups: &[&FavoriteGroup]) -> BindReport {
        for slot in &mut self.slots {
            slot.reset();
        }

        let mut report = BindReport::default();
        let mut pending: Vec<&FavoriteGroup> = Vec::new();

        for &group in groups {
            let exact = self
                .slots
                .iter_mut()
                .find(|slot| !slot.is_bound() && slot.kind == group.kind && slot.name == group.name);
            match exact {
                Some(slot) => {
                    slot.bind(group);
                    report.exact += 1;
                }
                None => pending.push(group),
            }
        }

        for group in pending {
            let free = self
                .slots
                .iter_mut()
                .find(|slot| !slot.is_bound() && slot.kind == group.kind);
            match free {
                Some(slot) => {
                    log::debug!("Group '{}' takes over slot {}", group.name, slot.id);
                    slot.bind(group);
                    report.fallback += 1;
                }
                None => {
                    log::warn!("No free {} slot for group '{}'", group.kind, group.name);
                    report.unbound_groups.push(group.id.clone());
                }
            }
        }
        report
    }

    /// Point each favorite at its bound slot and recount occupancy.
    /// Returns `(assigned, orphaned)`.
    pub fn assign(&mut self, favorites: &mut EntityCache<Favorite>) -> (usize, usize) {
        let by_key: HashMap<String, usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_bound())
            .map(|(i, slot)| (slot.key(), i))
            .collect();

        for slot in &mut self.slots {
            slot.count = 0;
        }

        let (mut assigned, mut orphaned) = (0, 0);
        for record in favorites.values_mut() {
            match by_key.get(&record.data.group_key) {
                Some(&i) => {
                    let slot = &mut self.slots[i];
                    slot.count += 1;
                    record.data.group_ref = Some(slot.id.clone());
                    assigned += 1;
                }
                None => {
                    record.data.group_ref = None;
                    orphaned += 1;
                }
            }
        }
        for slot in self.slots.iter().filter(|slot| slot.count > slot.capacity) {
            log::warn!("Slot {} holds {} favorites, capacity {}", slot.id, slot.count, slot.capacity);
        }
        (assigned, orphaned)
    }
}
