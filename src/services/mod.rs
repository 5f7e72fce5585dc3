//! Consumers built on top of the caches.
//!
//! - Friend roster buckets (`FriendRoster`)
//! - Favorite group slot binding (`FavoriteGroupBinder`)
//! - Activity feed (`Feed`)
//! - Game log classification (`GameLogParser`)

pub mod binder;
pub mod feed;
pub mod gamelog;
pub mod roster;

pub use binder::{BindReport, FavoriteGroupBinder, GroupSlot};
pub use feed::{Feed, FeedEntry, FeedKind};
pub use gamelog::{GameLogEvent, GameLogParser, GameLogRecord, RawLogEntry};
pub use roster::{Bucket, FriendRoster, FriendRosterEntry};
