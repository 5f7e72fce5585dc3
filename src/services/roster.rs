//! Friend roster buckets.
//!
//! Every friend sits in exactly one of four presence buckets. Each bucket
//! keeps a recency ordering (most recently updated first) that is maintained
//! on every mutation, and an alphabetical ordering that is only rebuilt when
//! read after a membership or name change.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bus::{Channel, Event, EventBus};
use crate::error::Result;
use crate::models::{EntityKind, FavoriteType, Snapshot, User};
use crate::storage::{self, KeyValueStore};

/// Storage key for per-bucket sort preferences.
pub const SORT_PREFERENCE_KEY: &str = "roster.sort_by_name";

/// Presence bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    VipOnline,
    Online,
    Active,
    Offline,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::VipOnline, Bucket::Online, Bucket::Active, Bucket::Offline];

    fn index(self) -> usize {
        self as usize
    }

    /// Bucket for a presence `state` and favorited flag.
    pub fn for_presence(state: &str, is_vip: bool) -> Self {
        match state {
            "online" if is_vip => Bucket::VipOnline,
            "online" => Bucket::Online,
            "active" => Bucket::Active,
            _ => Bucket::Offline,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::VipOnline => "vip-online",
            Bucket::Online => "online",
            Bucket::Active => "active",
            Bucket::Offline => "offline",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One friend as the roster sees them.
#[derive(Debug, Clone, PartialEq)]
pub struct FriendRosterEntry {
    pub id: String,
    pub display_name: String,
    pub state: String,
    pub status: String,
    pub location: String,
    pub is_vip: bool,
}

impl FriendRosterEntry {
    fn from_user(user: &User, is_vip: bool) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.display_name.clone(),
            state: user.state.clone(),
            status: user.status.clone(),
            location: user.location.clone(),
            is_vip,
        }
    }

    pub fn bucket(&self) -> Bucket {
        Bucket::for_presence(&self.state, self.is_vip)
    }
}

/// Per-bucket sort preference (`true` = alphabetical).
pub type SortPreferences = HashMap<Bucket, bool>;

#[derive(Debug, Default)]
struct BucketList {
    /// Most recently updated first
    recent: VecDeque<String>,
    sorted: Vec<String>,
    dirty: bool,
    sort_by_name: bool,
}

impl BucketList {
    fn push_front(&mut self, id: &str) {
        self.recent.push_front(id.to_string());
        self.dirty = true;
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.recent.iter().position(|member| member == id) {
            Some(pos) => {
                self.recent.remove(pos);
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Move to the front without touching the alphabetical order.
    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.recent.iter().position(|member| member == id) {
            if let Some(member) = self.recent.remove(pos) {
                self.recent.push_front(member);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct FriendRoster {
    entries: HashMap<String, FriendRosterEntry>,
    membership: HashMap<String, Bucket>,
    buckets: [BucketList; 4],
    /// Friend favorite id -> favorited user id, friends or not
    favorites: HashMap<String, String>,
}

impl FriendRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a friend, or refresh them if already present.
    pub fn add(&mut self, user: &User) {
        if self.entries.contains_key(&user.id) {
            self.apply_user(user);
            return;
        }
        let entry = FriendRosterEntry::from_user(user, self.is_vip(&user.id));
        let bucket = entry.bucket();
        self.buckets[bucket.index()].push_front(&entry.id);
        self.membership.insert(entry.id.clone(), bucket);
        self.entries.insert(entry.id.clone(), entry);
    }

    /// Remove a friend. Returns `false` if they were not on the roster.
    pub fn remove(&mut self, user_id: &str) -> bool {
        let Some(bucket) = self.membership.remove(user_id) else {
            return false;
        };
        self.buckets[bucket.index()].remove(user_id);
        self.entries.remove(user_id);
        true
    }

    /// Apply a user update. Non-members are ignored.
    pub fn apply_user(&mut self, user: &User) -> bool {
        let Some(entry) = self.entries.get_mut(&user.id) else {
            return false;
        };
        let renamed = entry.display_name != user.display_name;
        *entry = FriendRosterEntry::from_user(user, entry.is_vip);
        let bucket = entry.bucket();
        self.place(&user.id, bucket, renamed);
        true
    }

    /// Whether at least one friend favorite targets `user_id`.
    pub fn is_vip(&self, user_id: &str) -> bool {
        self.favorites.values().any(|target| target == user_id)
    }

    /// Record that friend favorite `favorite_id` targets `user_id`. A
    /// favorite that is re-pointed releases its previous target.
    pub fn track_favorite(&mut self, favorite_id: &str, user_id: &str) {
        let previous = self
            .favorites
            .insert(favorite_id.to_string(), user_id.to_string());
        if let Some(previous) = previous.filter(|p| p != user_id) {
            self.refresh_vip(&previous);
        }
        self.refresh_vip(user_id);
    }

    /// Forget a friend favorite. The target stays VIP while another
    /// favorite still points at them.
    pub fn untrack_favorite(&mut self, favorite_id: &str) {
        if let Some(previous) = self.favorites.remove(favorite_id) {
            self.refresh_vip(&previous);
        }
    }

    /// Re-bucket a friend after their favorited state may have changed.
    fn refresh_vip(&mut self, user_id: &str) {
        let is_vip = self.is_vip(user_id);
        let Some(entry) = self.entries.get_mut(user_id) else {
            return;
        };
        if entry.is_vip == is_vip {
            return;
        }
        entry.is_vip = is_vip;
        let bucket = entry.bucket();
        self.place(user_id, bucket, false);
    }

    /// Move `id` into `bucket` (or refresh its recency there).
    fn place(&mut self, id: &str, bucket: Bucket, renamed: bool) {
        let current = self.membership.get(id).copied();
        match current {
            Some(old) if old == bucket => {
                let list = &mut self.buckets[bucket.index()];
                list.touch(id);
                list.dirty |= renamed;
            }
            _ => {
                if let Some(old) = current {
                    self.buckets[old.index()].remove(id);
                }
                self.buckets[bucket.index()].push_front(id);
                self.membership.insert(id.to_string(), bucket);
            }
        }
    }

    /// Entries of a bucket in its preferred order. Sorts lazily.
    pub fn ordered(&mut self, bucket: Bucket) -> Vec<&FriendRosterEntry> {
        let entries = &self.entries;
        let list = &mut self.buckets[bucket.index()];
        if !list.sort_by_name {
            return list.recent.iter().filter_map(|id| entries.get(id)).collect();
        }
        if list.dirty {
            let mut sorted: Vec<String> = list.recent.iter().cloned().collect();
            sorted.sort_by_cached_key(|id| {
                let name = entries.get(id).map(|e| e.display_name.to_lowercase());
                (name, id.clone())
            });
            list.sorted = sorted;
            list.dirty = false;
        }
        list.sorted.iter().filter_map(|id| entries.get(id)).collect()
    }

    /// Whether the alphabetical ordering of `bucket` is out of date.
    pub fn needs_sort(&self, bucket: Bucket) -> bool {
        self.buckets[bucket.index()].dirty
    }

    pub fn set_sort_by_name(&mut self, bucket: Bucket, sort_by_name: bool) {
        self.buckets[bucket.index()].sort_by_name = sort_by_name;
    }

    pub fn sort_by_name(&self, bucket: Bucket) -> bool {
        self.buckets[bucket.index()].sort_by_name
    }

    pub fn preferences(&self) -> SortPreferences {
        Bucket::ALL
            .into_iter()
            .map(|bucket| (bucket, self.sort_by_name(bucket)))
            .collect()
    }

    pub fn apply_preferences(&mut self, preferences: &SortPreferences) {
        for (&bucket, &sort_by_name) in preferences {
            self.set_sort_by_name(bucket, sort_by_name);
        }
    }

    pub fn bucket_of(&self, user_id: &str) -> Option<Bucket> {
        self.membership.get(user_id).copied()
    }

    pub fn get(&self, user_id: &str) -> Option<&FriendRosterEntry> {
        self.entries.get(user_id)
    }

    pub fn bucket_len(&self, bucket: Bucket) -> usize {
        self.buckets[bucket.index()].recent.len()
    }

    /// Bucket sizes in [`Bucket::ALL`] order.
    pub fn lengths(&self) -> [(Bucket, usize); 4] {
        Bucket::ALL.map(|bucket| (bucket, self.bucket_len(bucket)))
    }

    /// Total friend count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep the roster in step with bus events.
    pub fn attach(roster: &Rc<RefCell<Self>>, bus: &EventBus) {
        let r = Rc::clone(roster);
        bus.on(Channel::FriendAdd, move |event| {
            if let Event::FriendAdd { user } = event {
                r.borrow_mut().add(user);
            }
            Ok(())
        });

        let r = Rc::clone(roster);
        bus.on(Channel::FriendDelete, move |event| {
            if let Event::FriendDelete { user_id } = event {
                r.borrow_mut().remove(user_id);
            }
            Ok(())
        });

        for channel in [
            Channel::Created(EntityKind::User),
            Channel::Updated(EntityKind::User),
        ] {
            let r = Rc::clone(roster);
            bus.on(channel, move |event| {
                if let Event::Created { record: Snapshot::User(user) }
                | Event::Updated { record: Snapshot::User(user), .. } = event
                {
                    r.borrow_mut().apply_user(user);
                }
                Ok(())
            });
        }

        let r = Rc::clone(roster);
        bus.on(Channel::Deleted(EntityKind::User), move |event| {
            if let Event::Deleted { record } = event {
                r.borrow_mut().remove(record.id());
            }
            Ok(())
        });

        for channel in [
            Channel::Created(EntityKind::Favorite),
            Channel::Updated(EntityKind::Favorite),
        ] {
            let r = Rc::clone(roster);
            bus.on(channel, move |event| {
                if let Event::Created { record: Snapshot::Favorite(favorite) }
                | Event::Updated { record: Snapshot::Favorite(favorite), .. } = event
                {
                    let mut roster = r.borrow_mut();
                    if favorite.kind == FavoriteType::Friend {
                        roster.track_favorite(&favorite.id, &favorite.favorite_id);
                    } else {
                        roster.untrack_favorite(&favorite.id);
                    }
                }
                Ok(())
            });
        }

        let r = Rc::clone(roster);
        bus.on(Channel::Deleted(EntityKind::Favorite), move |event| {
            if let Event::Deleted { record } = event {
                r.borrow_mut().untrack_favorite(record.id());
            }
            Ok(())
        });
    }
}

/// Load stored sort preferences; missing means all chronological.
pub async fn load_preferences<S>(store: &S) -> Result<SortPreferences>
where
    S: KeyValueStore + ?Sized,
{
    Ok(storage::load(store, SORT_PREFERENCE_KEY).await?.unwrap_or_default())
}

pub async fn save_preferences<S>(store: &S, preferences: &SortPreferences) -> Result<()>
where
    S: KeyValueStore + ?Sized,
{
    storage::save(store, SORT_PREFERENCE_KEY, preferences).await
}
