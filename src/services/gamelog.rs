//! Game log classification.
//!
//! A log-tail transport hands over raw `[timestamp, type, args...]` tuples
//! per source (one per log file or session). Each tuple becomes a typed
//! event. The only state kept is a small context per source: the current
//! location, who is in the instance, and the last video and resource URLs
//! so that repeated lines are dropped.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bus::Event;
use crate::error::{AppError, Result};
use crate::location::LocationContext;
use crate::registry::Registry;

/// One raw tuple.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Vec<Value>")]
pub struct RawLogEntry {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub args: Vec<Value>,
}

impl TryFrom<Vec<Value>> for RawLogEntry {
    type Error = AppError;

    fn try_from(parts: Vec<Value>) -> Result<Self> {
        let mut parts = parts.into_iter();
        let at = parts
            .next()
            .ok_or_else(|| AppError::payload("empty game log tuple"))?;
        let at = parse_timestamp(&at)?;
        let kind = match parts.next() {
            Some(Value::String(kind)) => kind,
            _ => return Err(AppError::payload("game log tuple has no type")),
        };
        Ok(Self {
            at,
            kind,
            args: parts.collect(),
        })
    }
}

impl RawLogEntry {
    /// Parse one JSON-encoded tuple.
    pub fn from_json(line: &str) -> Result<Self> {
        let parts: Vec<Value> = serde_json::from_str(line)?;
        Self::try_from(parts)
    }

    fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    fn arg_string(&self, i: usize) -> String {
        self.arg(i).unwrap_or_default().to_string()
    }

    fn required(&self, i: usize, what: &str) -> Result<&str> {
        self.arg(i)
            .ok_or_else(|| AppError::payload(format!("{} entry is missing {}", self.kind, what)))
    }
}

/// RFC 3339 string or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Result<DateTime<Utc>> {
    match value {
        Value::String(s) => Ok(DateTime::parse_from_rfc3339(s)
            .map_err(|e| AppError::payload(format!("bad game log timestamp '{s}': {e}")))?
            .with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| AppError::payload(format!("bad game log timestamp {n}"))),
        other => Err(AppError::payload(format!("bad game log timestamp {other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    String,
    Image,
}

/// Typed game log event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum GameLogEvent {
    Location {
        location: LocationContext,
        world_name: String,
    },
    LocationDestination {
        location: String,
    },
    PlayerJoined {
        display_name: String,
        user_id: Option<String>,
    },
    PlayerLeft {
        display_name: String,
        user_id: Option<String>,
        /// Time since the matching join in this source, if seen
        time_ms: Option<i64>,
    },
    VideoPlay {
        url: String,
        display_name: Option<String>,
    },
    ResourceLoad {
        resource: ResourceKind,
        url: String,
    },
    PortalSpawn,
    AvatarChange {
        display_name: String,
        avatar_name: String,
    },
    Event {
        data: String,
    },
    Notification {
        data: Value,
    },
    Unknown {
        kind: String,
        args: Vec<Value>,
    },
}

/// A classified tuple.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameLogRecord {
    pub source: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: GameLogEvent,
}

/// Per-source context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceContext {
    pub location: Option<LocationContext>,
    pub world_name: String,
    /// display name -> join time
    pub players: HashMap<String, DateTime<Utc>>,
    pub last_video_url: Option<String>,
    pub last_resource_url: Option<String>,
}

#[derive(Debug, Default)]
pub struct GameLogParser {
    sources: HashMap<String, SourceContext>,
}

impl GameLogParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self, source: &str) -> Option<&SourceContext> {
        self.sources.get(source)
    }

    /// Forget everything known about `source`.
    pub fn reset(&mut self, source: &str) {
        self.sources.remove(source);
    }

    /// Classify one tuple. Returns `None` for a repeated video or resource
    /// line.
    pub fn parse(&mut self, source: &str, entry: &RawLogEntry) -> Result<Option<GameLogRecord>> {
        let ctx = self.sources.entry(source.to_string()).or_default();

        let event = match entry.kind.as_str() {
            "location" => {
                let location = LocationContext::parse(entry.required(0, "a location tag")?);
                let world_name = entry.arg_string(1);
                ctx.players.clear();
                ctx.location = Some(location.clone());
                ctx.world_name = world_name.clone();
                GameLogEvent::Location {
                    location,
                    world_name,
                }
            }
            "location-destination" => GameLogEvent::LocationDestination {
                location: entry.required(0, "a location tag")?.to_string(),
            },
            "player-joined" => {
                let display_name = entry.required(0, "a display name")?.to_string();
                ctx.players.insert(display_name.clone(), entry.at);
                GameLogEvent::PlayerJoined {
                    display_name,
                    user_id: entry.arg(1).map(str::to_string),
                }
            }
            "player-left" => {
                let display_name = entry.required(0, "a display name")?.to_string();
                let time_ms = ctx
                    .players
                    .remove(&display_name)
                    .map(|joined| (entry.at - joined).num_milliseconds());
                GameLogEvent::PlayerLeft {
                    display_name,
                    user_id: entry.arg(1).map(str::to_string),
                    time_ms,
                }
            }
            "video-play" => {
                let url = entry.required(0, "a URL")?.to_string();
                if ctx.last_video_url.as_deref() == Some(url.as_str()) {
                    return Ok(None);
                }
                ctx.last_video_url = Some(url.clone());
                GameLogEvent::VideoPlay {
                    url,
                    display_name: entry.arg(1).map(str::to_string),
                }
            }
            "resource-load-string" | "resource-load-image" => {
                let url = entry.required(0, "a URL")?.to_string();
                if ctx.last_resource_url.as_deref() == Some(url.as_str()) {
                    return Ok(None);
                }
                ctx.last_resource_url = Some(url.clone());
                let resource = if entry.kind.ends_with("image") {
                    ResourceKind::Image
                } else {
                    ResourceKind::String
                };
                GameLogEvent::ResourceLoad { resource, url }
            }
            "portal-spawn" => GameLogEvent::PortalSpawn,
            "avatar-change" => GameLogEvent::AvatarChange {
                display_name: entry.arg_string(0),
                avatar_name: entry.arg_string(1),
            },
            "event" => GameLogEvent::Event {
                data: entry.arg_string(0),
            },
            "notification" => {
                let data = match entry.args.first() {
                    Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|_| json!(s)),
                    Some(other) => other.clone(),
                    None => Value::Null,
                };
                GameLogEvent::Notification { data }
            }
            other => GameLogEvent::Unknown {
                kind: other.to_string(),
                args: entry.args.clone(),
            },
        };

        Ok(Some(GameLogRecord {
            source: source.to_string(),
            at: entry.at,
            event,
        }))
    }

    /// Parse and forward: a location becomes a `LocationObserved` bus event
    /// and, when the signed-in user is known, an update of their location.
    pub fn ingest(
        &mut self,
        registry: &Registry,
        source: &str,
        entry: &RawLogEntry,
    ) -> Result<Option<GameLogRecord>> {
        let record = self.parse(source, entry)?;
        if let Some(GameLogRecord {
            event: GameLogEvent::Location {
                location,
                world_name,
            },
            at,
            ..
        }) = &record
        {
            registry.bus.emit(Event::LocationObserved {
                source: source.to_string(),
                location: location.clone(),
                world_name: world_name.clone(),
                at: *at,
            });
            if let Some(user_id) = registry.current_user_id() {
                registry.upsert_user(&json!({
                    "id": user_id,
                    "location": location.tag,
                    "worldId": location.world_id,
                }))?;
            }
        }
        Ok(record)
    }
}
