//! Push stream transport.
//!
//! Frames are `{"type": "...", "content": ...}` where `content` is either an
//! object or a JSON document encoded as a string. Reconnect policy belongs to
//! the caller; the caches recover from gaps through reconciliation passes.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::error::{AppError, Result};

/// One decoded push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

impl PushMessage {
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            content,
        }
    }
}

/// Decode a text frame. A string `content` that is not itself JSON (bare
/// notification ids) is kept as a string.
pub fn decode_message(text: &str) -> Result<PushMessage> {
    let mut message: PushMessage = serde_json::from_str(text)?;
    if let Value::String(inner) = &message.content {
        if let Ok(parsed) = serde_json::from_str::<Value>(inner) {
            if parsed.is_object() || parsed.is_array() {
                message.content = parsed;
            }
        }
    }
    Ok(message)
}

/// Connected push stream.
pub struct PushStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushStream {
    /// Connect to `websocket_url?authToken=<token>`.
    pub async fn connect(websocket_url: &str, token: &str) -> Result<Self> {
        let mut url = Url::parse(websocket_url)?;
        url.query_pairs_mut().append_pair("authToken", token);
        let (socket, _response) = connect_async(url.as_str()).await?;
        log::info!("Push stream connected to {}", websocket_url);
        Ok(Self { socket })
    }

    /// Next decoded message; `None` once the stream has closed.
    ///
    /// Undecodable frames are logged and skipped.
    pub async fn next(&mut self) -> Option<Result<PushMessage>> {
        while let Some(frame) = self.socket.next().await {
            match frame {
                Ok(Message::Text(text)) => match decode_message(&text) {
                    Ok(message) => return Some(Ok(message)),
                    Err(e) => log::warn!("Dropping undecodable push frame: {}", e),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(AppError::from(e))),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_nested_string_content() {
        let frame = r#"{"type":"friend-online","content":"{\"userId\":\"usr_1\",\"location\":\"wrld_1:1\"}"}"#;
        let message = decode_message(frame).unwrap();
        assert_eq!(message.kind, "friend-online");
        assert_eq!(message.content["userId"], json!("usr_1"));
    }

    #[test]
    fn test_decode_object_content() {
        let frame = r#"{"type":"notification","content":{"id":"not_1","type":"invite"}}"#;
        let message = decode_message(frame).unwrap();
        assert_eq!(message.content["id"], json!("not_1"));
    }

    #[test]
    fn test_decode_bare_id_content() {
        let frame = r#"{"type":"see-notification","content":"not_1"}"#;
        let message = decode_message(frame).unwrap();
        assert_eq!(message.content, json!("not_1"));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(decode_message("not json").is_err());
    }
}
