//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::FavoriteType;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Remote API and push stream endpoints
    #[serde(default)]
    pub api: ApiConfig,

    /// Reconciliation paging and cadence
    #[serde(default)]
    pub sync: SyncConfig,

    /// Fixed favorite group slots
    #[serde(default)]
    pub favorites: FavoritesConfig,

    /// Activity feed settings
    #[serde(default)]
    pub feed: FeedConfig,

    /// Key-value store location
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(AppError::validation("api.base_url is empty"));
        }
        url::Url::parse(&self.api.base_url)?;
        if self.api.user_agent.trim().is_empty() {
            return Err(AppError::validation("api.user_agent is empty"));
        }
        if self.api.timeout_secs == 0 {
            return Err(AppError::validation("api.timeout_secs must be > 0"));
        }
        for (name, size) in [
            ("sync.friends_page_size", self.sync.friends_page_size),
            ("sync.notifications_page_size", self.sync.notifications_page_size),
            ("sync.moderations_page_size", self.sync.moderations_page_size),
            ("sync.favorites_page_size", self.sync.favorites_page_size),
            ("sync.favorite_groups_page_size", self.sync.favorite_groups_page_size),
        ] {
            if size == 0 {
                return Err(AppError::validation(format!("{name} must be > 0")));
            }
        }
        if self.sync.interval_secs == 0 {
            return Err(AppError::validation("sync.interval_secs must be > 0"));
        }
        if self.sync.max_interval_secs < self.sync.interval_secs {
            return Err(AppError::validation(
                "sync.max_interval_secs must be >= sync.interval_secs",
            ));
        }
        for table in self.favorites.tables() {
            if table.names.is_empty() {
                return Err(AppError::validation(format!(
                    "favorites.{} has no slots",
                    table.kind
                )));
            }
            if table.capacity == 0 {
                return Err(AppError::validation(format!(
                    "favorites.{} capacity must be > 0",
                    table.kind
                )));
            }
        }
        if self.feed.max_entries == 0 {
            return Err(AppError::validation("feed.max_entries must be > 0"));
        }
        Ok(())
    }
}

/// Remote service endpoints and HTTP behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    #[serde(default = "defaults::websocket_url")]
    pub websocket_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// How long a 403/404 GET is remembered before it may be re-issued
    #[serde(default = "defaults::negative_cache")]
    pub negative_cache_secs: u64,

    /// Session token sent with the push stream connection
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            websocket_url: defaults::websocket_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            negative_cache_secs: defaults::negative_cache(),
            auth_token: None,
        }
    }
}

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "defaults::friends_page_size")]
    pub friends_page_size: usize,
    #[serde(default = "defaults::notifications_page_size")]
    pub notifications_page_size: usize,
    #[serde(default = "defaults::moderations_page_size")]
    pub moderations_page_size: usize,
    #[serde(default = "defaults::favorites_page_size")]
    pub favorites_page_size: usize,
    #[serde(default = "defaults::favorite_groups_page_size")]
    pub favorite_groups_page_size: usize,

    /// Seconds between reconciliation passes
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Upper bound the interval may grow to while rate limited
    #[serde(default = "defaults::max_interval")]
    pub max_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            friends_page_size: defaults::friends_page_size(),
            notifications_page_size: defaults::notifications_page_size(),
            moderations_page_size: defaults::moderations_page_size(),
            favorites_page_size: defaults::favorites_page_size(),
            favorite_groups_page_size: defaults::favorite_groups_page_size(),
            interval_secs: defaults::interval(),
            max_interval_secs: defaults::max_interval(),
        }
    }
}

/// Slot names and capacity for one favorite type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotTable {
    #[serde(rename = "type")]
    pub kind: FavoriteType,
    pub names: Vec<String>,
    pub capacity: usize,
}

/// Fixed client-side favorite group slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoritesConfig {
    #[serde(default = "defaults::friend_slots")]
    pub friend: SlotTable,
    #[serde(default = "defaults::world_slots")]
    pub world: SlotTable,
    #[serde(default = "defaults::avatar_slots")]
    pub avatar: SlotTable,
}

impl FavoritesConfig {
    /// Tables in slot order.
    pub fn tables(&self) -> [&SlotTable; 3] {
        [&self.friend, &self.world, &self.avatar]
    }
}

impl Default for FavoritesConfig {
    fn default() -> Self {
        Self {
            friend: defaults::friend_slots(),
            world: defaults::world_slots(),
            avatar: defaults::avatar_slots(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Oldest entries are dropped beyond this
    #[serde(default = "defaults::feed_max_entries")]
    pub max_entries: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_entries: defaults::feed_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::storage_dir")]
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: defaults::storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use super::SlotTable;
    use crate::models::FavoriteType;

    // API defaults
    pub fn base_url() -> String {
        "https://api.vrchat.cloud/api/1/".into()
    }
    pub fn websocket_url() -> String {
        "wss://pipeline.vrchat.cloud/".into()
    }
    pub fn user_agent() -> String {
        "presence-sync/0.1".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn negative_cache() -> u64 {
        15 * 60
    }

    // Sync defaults
    pub fn friends_page_size() -> usize {
        50
    }
    pub fn notifications_page_size() -> usize {
        100
    }
    pub fn moderations_page_size() -> usize {
        100
    }
    pub fn favorites_page_size() -> usize {
        300
    }
    pub fn favorite_groups_page_size() -> usize {
        50
    }
    pub fn interval() -> u64 {
        300
    }
    pub fn max_interval() -> u64 {
        3600
    }

    // Favorite slot defaults
    fn numbered(prefix: &str, range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("{prefix}{i}")).collect()
    }
    pub fn friend_slots() -> SlotTable {
        SlotTable {
            kind: FavoriteType::Friend,
            names: numbered("group_", 0..3),
            capacity: 32,
        }
    }
    pub fn world_slots() -> SlotTable {
        SlotTable {
            kind: FavoriteType::World,
            names: numbered("worlds", 1..5),
            capacity: 32,
        }
    }
    pub fn avatar_slots() -> SlotTable {
        SlotTable {
            kind: FavoriteType::Avatar,
            names: numbered("avatars", 1..2),
            capacity: 16,
        }
    }

    pub fn feed_max_entries() -> usize {
        1000
    }
    pub fn storage_dir() -> String {
        "storage".into()
    }
    pub fn log_level() -> String {
        "info".into()
    }
}
