// src/location.rs

//! Location tag parsing.
//!
//! A location tag is one of `offline`, `private`, `traveling`, a bare world id,
//! or `worldId:instanceName~key(value)~flag...`. Parsing is pure; owners cache
//! the parsed [`LocationContext`] next to the raw tag and only re-parse when
//! the tag changes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who may join an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    #[serde(rename = "public")]
    Public,
    #[serde(rename = "friends+")]
    FriendsPlus,
    #[serde(rename = "friends")]
    Friends,
    #[serde(rename = "invite+")]
    InvitePlus,
    #[serde(rename = "invite")]
    Invite,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Public => "public",
            AccessType::FriendsPlus => "friends+",
            AccessType::Friends => "friends",
            AccessType::InvitePlus => "invite+",
            AccessType::Invite => "invite",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of a location tag. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationContext {
    pub tag: String,
    pub is_offline: bool,
    pub is_private: bool,
    pub is_traveling: bool,
    pub world_id: String,
    /// Everything after the first `:`, modifiers included
    pub instance_id: String,
    pub instance_name: String,
    pub access_type: Option<AccessType>,
    /// Owner resolved from whichever access modifier matched
    pub user_id: Option<String>,
    pub region: Option<String>,
    pub can_request_invite: bool,
}

impl LocationContext {
    /// Parse a raw location tag.
    pub fn parse(tag: &str) -> Self {
        let mut ctx = LocationContext {
            tag: tag.to_string(),
            ..LocationContext::default()
        };

        match tag {
            "offline" | "offline:offline" => {
                ctx.is_offline = true;
                return ctx;
            }
            "private" | "private:private" => {
                ctx.is_private = true;
                return ctx;
            }
            "traveling" | "traveling:traveling" => {
                ctx.is_traveling = true;
                return ctx;
            }
            "" => return ctx,
            _ => {}
        }

        let Some((world_id, instance_id)) = tag.split_once(':') else {
            ctx.world_id = tag.to_string();
            return ctx;
        };
        ctx.world_id = world_id.to_string();
        ctx.instance_id = instance_id.to_string();

        let mut hidden_id = None;
        let mut private_id = None;
        let mut friends_id = None;

        let mut tokens = instance_id.split('~');
        ctx.instance_name = tokens.next().unwrap_or_default().to_string();
        for token in tokens {
            let (key, value) = split_modifier(token);
            match key {
                "hidden" => hidden_id = Some(value.to_string()),
                "private" => private_id = Some(value.to_string()),
                "friends" => friends_id = Some(value.to_string()),
                "canRequestInvite" => ctx.can_request_invite = true,
                "region" => ctx.region = Some(value.to_string()),
                _ => {}
            }
        }

        let (access_type, user_id) = if let Some(id) = private_id {
            if ctx.can_request_invite {
                (AccessType::InvitePlus, Some(id))
            } else {
                (AccessType::Invite, Some(id))
            }
        } else if let Some(id) = friends_id {
            (AccessType::Friends, Some(id))
        } else if let Some(id) = hidden_id {
            (AccessType::FriendsPlus, Some(id))
        } else {
            (AccessType::Public, None)
        };
        ctx.access_type = Some(access_type);
        ctx.user_id = user_id;
        ctx
    }

    /// A joinable world instance, as opposed to offline/private/traveling.
    pub fn is_real_instance(&self) -> bool {
        !self.world_id.is_empty() && !self.instance_id.is_empty()
    }

    /// Whether a world id can be resolved from this location.
    pub fn has_world(&self) -> bool {
        !self.is_offline && !self.is_private && !self.is_traveling && !self.world_id.is_empty()
    }
}

/// Split `key(value)` into its parts; a bare `key` has an empty value.
fn split_modifier(token: &str) -> (&str, &str) {
    match (token.find('('), token.rfind(')')) {
        (Some(open), Some(close)) if open < close => (&token[..open], &token[open + 1..close]),
        _ => (token, ""),
    }
}
