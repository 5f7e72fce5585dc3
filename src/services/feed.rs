//! Friend activity feed.
//!
//! Turns user field changes into human-readable rows: location moves (with
//! time spent at the previous location), status changes, avatar changes and
//! online/offline transitions. Game-log location observations are recorded
//! too. The list is bounded; oldest rows fall off first.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{Channel, Event, EventBus};
use crate::cache::Changes;
use crate::error::Result;
use crate::models::{EntityKind, Snapshot, User};
use crate::storage::{self, KeyValueStore};

/// Storage key for persisted feed rows.
pub const FEED_HISTORY_KEY: &str = "feed.history";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum FeedKind {
    Gps {
        location: String,
        previous_location: String,
        /// Time spent at the previous location
        elapsed_ms: Option<i64>,
    },
    Status {
        status: String,
        status_description: String,
        previous_status: String,
        previous_status_description: String,
    },
    Avatar {
        image_url: String,
        previous_image_url: String,
    },
    Online {
        location: String,
    },
    Offline {
        /// Last known location before going offline
        location: String,
    },
    GameLogLocation {
        source: String,
        location: String,
        world_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub at: DateTime<Utc>,
    pub user_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub kind: FeedKind,
}

#[derive(Debug)]
pub struct Feed {
    entries: VecDeque<FeedEntry>,
    max_entries: usize,
}

impl Feed {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn push(&mut self, entry: FeedEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// Replace the contents with stored rows, keeping the newest.
    pub fn restore(&mut self, entries: Vec<FeedEntry>) {
        self.entries.clear();
        for entry in entries {
            self.push(entry);
        }
    }

    /// Rows oldest first.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &FeedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a friend update. Non-friends are skipped.
    pub fn record_update(&mut self, user: &User, changes: &Changes, at: DateTime<Utc>) {
        if !user.is_friend {
            return;
        }
        for kind in describe_update(user, changes) {
            self.push(FeedEntry {
                at,
                user_id: user.id.clone(),
                display_name: user.display_name.clone(),
                kind,
            });
        }
    }

    /// Keep the feed in step with bus events.
    pub fn attach(feed: &Rc<RefCell<Self>>, bus: &EventBus) {
        let f = Rc::clone(feed);
        bus.on(Channel::Updated(EntityKind::User), move |event| {
            if let Event::Updated {
                record: Snapshot::User(user),
                changes,
            } = event
            {
                f.borrow_mut().record_update(user, changes, Utc::now());
            }
            Ok(())
        });

        let f = Rc::clone(feed);
        bus.on(Channel::LocationObserved, move |event| {
            if let Event::LocationObserved {
                source,
                location,
                world_name,
                at,
            } = event
            {
                f.borrow_mut().push(FeedEntry {
                    at: *at,
                    user_id: String::new(),
                    display_name: String::new(),
                    kind: FeedKind::GameLogLocation {
                        source: source.clone(),
                        location: location.tag.clone(),
                        world_name: world_name.clone(),
                    },
                });
            }
            Ok(())
        });
    }
}

/// Feed rows for one user change set. `user` is the record after the merge.
pub fn describe_update(user: &User, changes: &Changes) -> Vec<FeedKind> {
    let mut rows = Vec::new();
    let text = |field: &str| {
        changes
            .get(field)
            .map(|c| (c.new_str().to_string(), c.old_str().to_string()))
    };

    if let Some((state, previous_state)) = text("state") {
        let location = changes
            .get("location")
            .map(|c| (c.new_str(), c.old_str()));
        if state == "online" && previous_state != "online" {
            rows.push(FeedKind::Online {
                location: location.map(|(new, _)| new.to_string()).unwrap_or_default(),
            });
        } else if state == "offline" && previous_state == "online" {
            rows.push(FeedKind::Offline {
                location: location.map(|(_, old)| old.to_string()).unwrap_or_default(),
            });
        }
    }

    if let Some(change) = changes.get("location") {
        let (new, old) = (change.new_str(), change.old_str());
        let moved = !is_unplaced(new) && !is_unplaced(old);
        if moved {
            rows.push(FeedKind::Gps {
                location: new.to_string(),
                previous_location: old.to_string(),
                elapsed_ms: change.elapsed_ms,
            });
        }
    }

    let status = changes.get("status");
    let description = changes.get("statusDescription");
    if status.is_some() || description.is_some() {
        rows.push(FeedKind::Status {
            status: user.status.clone(),
            status_description: user.status_description.clone(),
            previous_status: status.map_or(user.status.clone(), |c| c.old_str().to_string()),
            previous_status_description: description
                .map_or(user.status_description.clone(), |c| c.old_str().to_string()),
        });
    }

    if let Some((image_url, previous_image_url)) = text("currentAvatarImageUrl") {
        rows.push(FeedKind::Avatar {
            image_url,
            previous_image_url,
        });
    }

    rows
}

/// Locations that are not a place: offline, traveling, empty.
fn is_unplaced(location: &str) -> bool {
    matches!(location, "" | "offline" | "traveling")
}

pub async fn load_history<S>(store: &S) -> Result<Vec<FeedEntry>>
where
    S: KeyValueStore + ?Sized,
{
    Ok(storage::load(store, FEED_HISTORY_KEY).await?.unwrap_or_default())
}

pub async fn save_history<S>(store: &S, entries: &[FeedEntry]) -> Result<()>
where
    S: KeyValueStore + ?Sized,
{
    storage::save(store, FEED_HISTORY_KEY, entries).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::registry::Registry;
    use crate::storage::MemoryStore;

    fn attached() -> (Rc<Registry>, Rc<RefCell<Feed>>) {
        let registry = Registry::new();
        let feed = Rc::new(RefCell::new(Feed::new(10)));
        Feed::attach(&feed, &registry.bus);
        (registry, feed)
    }

    fn kinds(feed: &Feed) -> Vec<FeedKind> {
        feed.entries().map(|e| e.kind.clone()).collect()
    }

    #[test]
    fn test_friend_moves_and_goes_offline() {
        let (registry, feed) = attached();
        registry
            .upsert_user(&json!({ "id": "usr_1", "displayName": "Alice", "isFriend": true, "state": "online", "location": "wrld_1:1" }))
            .unwrap();
        registry
            .upsert_user(&json!({ "id": "usr_1", "location": "wrld_2:7" }))
            .unwrap();
        registry
            .upsert_user(&json!({ "id": "usr_1", "state": "offline", "location": "offline" }))
            .unwrap();

        let feed = feed.borrow();
        let rows = kinds(&feed);
        assert_eq!(rows.len(), 2);
        match &rows[0] {
            FeedKind::Gps {
                location,
                previous_location,
                elapsed_ms,
            } => {
                assert_eq!(location, "wrld_2:7");
                assert_eq!(previous_location, "wrld_1:1");
                assert!(elapsed_ms.is_some());
            }
            other => panic!("unexpected row {other:?}"),
        }
        assert_eq!(
            rows[1],
            FeedKind::Offline {
                location: "wrld_2:7".into()
            }
        );
        assert!(feed.entries().all(|e| e.display_name == "Alice"));
    }

    #[test]
    fn test_status_and_avatar_rows() {
        let (registry, feed) = attached();
        registry
            .upsert_user(&json!({ "id": "usr_1", "isFriend": true, "status": "active", "statusDescription": "hi" }))
            .unwrap();
        registry
            .upsert_user(&json!({ "id": "usr_1", "status": "busy", "currentAvatarImageUrl": "https://img/2" }))
            .unwrap();

        let rows = kinds(&feed.borrow());
        assert_eq!(
            rows,
            vec![
                FeedKind::Status {
                    status: "busy".into(),
                    status_description: "hi".into(),
                    previous_status: "active".into(),
                    previous_status_description: "hi".into(),
                },
                FeedKind::Avatar {
                    image_url: "https://img/2".into(),
                    previous_image_url: "".into(),
                },
            ]
        );
    }

    #[test]
    fn test_non_friends_are_skipped() {
        let (registry, feed) = attached();
        registry.upsert_user(&json!({ "id": "usr_9", "status": "active" })).unwrap();
        registry.upsert_user(&json!({ "id": "usr_9", "status": "busy" })).unwrap();
        assert!(feed.borrow().is_empty());
    }

    #[test]
    fn test_bounded() {
        let mut feed = Feed::new(2);
        for i in 0..5 {
            feed.push(FeedEntry {
                at: Utc::now(),
                user_id: format!("usr_{i}"),
                display_name: String::new(),
                kind: FeedKind::Online {
                    location: String::new(),
                },
            });
        }
        let ids: Vec<&str> = feed.entries().map(|e| e.user_id.as_str()).collect();
        assert_eq!(ids, vec!["usr_3", "usr_4"]);
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let store = MemoryStore::new();
        let mut feed = Feed::new(10);
        feed.push(FeedEntry {
            at: Utc::now(),
            user_id: "usr_1".into(),
            display_name: "Alice".into(),
            kind: FeedKind::Gps {
                location: "wrld_2:1".into(),
                previous_location: "wrld_1:1".into(),
                elapsed_ms: Some(1500),
            },
        });
        let rows: Vec<FeedEntry> = feed.entries().cloned().collect();
        save_history(&store, &rows).await.unwrap();

        let stored = store.get(FEED_HISTORY_KEY).await.unwrap().unwrap();
        assert_eq!(stored[0]["type"], json!("gps"));

        let mut restored = Feed::new(10);
        restored.restore(load_history(&store).await.unwrap());
        assert_eq!(restored.entries().next(), rows.first());
    }
}
