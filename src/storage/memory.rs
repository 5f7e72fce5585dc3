//! In-memory store.

use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::storage::KeyValueStore;

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}

#[async_trait(?Send)]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.borrow().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{load, save};

    #[tokio::test]
    async fn test_typed_round_trip() {
        let store = MemoryStore::new();
        save(&store, "numbers", &vec![1, 2, 3]).await.unwrap();
        let loaded: Option<Vec<u32>> = load(&store, "numbers").await.unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        let wrong: crate::error::Result<Option<String>> = load(&store, "numbers").await;
        assert!(wrong.is_err());
        assert_eq!(store.len(), 1);
    }
}
