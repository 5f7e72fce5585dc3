//! Key-value persistence for client preferences and history.
//!
//! The core owns no schema here: callers pick a key and store any JSON
//! value under it. Two backends exist:
//!
//! - [`LocalStore`]: one JSON file per key under a root directory
//! - [`MemoryStore`]: process-local map, for tests and dry runs
//!
//! ## Keys in use
//!
//! ```text
//! roster.sort_by_name   # {"vip-online": true, "online": false, ...}
//! feed.history          # [FeedEntry, ...], newest last
//! ```

pub mod local;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

pub use local::LocalStore;
pub use memory::MemoryStore;

/// Async JSON key-value store.
#[async_trait(?Send)]
pub trait KeyValueStore {
    /// Value stored under `key`, or `None` if never set.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// Typed read. A stored value of the wrong shape is an error.
pub async fn load<T, S>(store: &S, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed write.
pub async fn save<T, S>(store: &S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    store.set(key, serde_json::to_value(value)?).await
}
