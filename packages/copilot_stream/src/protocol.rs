//! Wire protocol: canonical inbound events, the outbound envelope, and the
//! normalizer that folds every frame shape the backend produces into
//! [`ServerEvent`].
//!
//! The backend is inconsistent about framing. Depending on deployment it sends
//! typed JSON (`{"type":"token","content":"..."}`), untyped JSON chunks
//! (`{"delta":"..."}`, `{"content":"...","done":true}`), or bare text lines.
//! [`normalize`] is total: anything it cannot place becomes
//! [`ServerEvent::Unrecognized`] or no event at all.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::message::{Citation, MessageKind, Role};

/// Untyped chunk fields, in precedence order.
const CHUNK_FIELDS: [&str; 4] = ["content", "token", "text", "delta"];

const DEFAULT_ERROR_TEXT: &str = "Something went wrong. Please try again.";

/// Read a field of a known event leniently: a value of the wrong shape
/// (including `null`) becomes the default instead of rejecting the frame.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_else(|err| {
        tracing::debug!("ignoring malformed field: {}", err);
        T::default()
    }))
}

/// Like [`lenient`] for lists, but only the entries that don't fit are
/// skipped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!("skipping malformed entry: {}", err);
                None
            }
        })
        .collect())
}

/// Strings as-is, numbers and booleans as their JSON text, anything else empty.
pub(crate) fn loose_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        value @ (Value::Number(_) | Value::Bool(_)) => value.to_string(),
        _ => String::new(),
    })
}

/// One entry of a replayed conversation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    #[serde(default, deserialize_with = "loose_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub sources: Vec<String>,
}

/// Canonical inbound event. Typed frames deserialize straight into this enum;
/// the other shapes are mapped onto it by [`normalize`].
///
/// Every field is optional and read leniently, so a frame whose `type` names
/// a known event always becomes that event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionStarted {
        #[serde(default, deserialize_with = "lenient")]
        session_id: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        conversation_id: Option<String>,
        /// False (or absent) when the backend resumed an existing conversation.
        #[serde(default, deserialize_with = "lenient")]
        new_conversation: bool,
    },
    ChatHistory {
        #[serde(default, deserialize_with = "lenient_list")]
        messages: Vec<HistoryEntry>,
    },
    StreamStart {
        #[serde(default, deserialize_with = "lenient_list")]
        sources: Vec<String>,
        #[serde(default, deserialize_with = "lenient")]
        kind: Option<MessageKind>,
    },
    Token {
        #[serde(default, deserialize_with = "loose_string")]
        content: String,
    },
    StreamEnd {
        #[serde(default, deserialize_with = "lenient_list")]
        sources: Vec<String>,
        #[serde(default, deserialize_with = "lenient")]
        kind: Option<MessageKind>,
        #[serde(default, deserialize_with = "lenient_list")]
        citations: Vec<Citation>,
        #[serde(default, deserialize_with = "lenient_list")]
        follow_ups: Vec<String>,
    },
    ConversationTitleUpdated {
        #[serde(default, deserialize_with = "lenient")]
        conversation_id: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        title: Option<String>,
    },
    Error {
        #[serde(default, deserialize_with = "lenient")]
        content: Option<String>,
        #[serde(default, deserialize_with = "lenient")]
        message: Option<String>,
    },
    /// The socket closed. Normally synthesized by the connection manager.
    WsClosed,
    /// JSON that fits no known shape. Consumers ignore it.
    #[serde(skip)]
    Unrecognized(Value),
}

impl ServerEvent {
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    pub fn stream_end(sources: Vec<String>) -> Self {
        Self::StreamEnd {
            sources,
            kind: None,
            citations: Vec::new(),
            follow_ups: Vec::new(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: Some(content.into()),
            message: None,
        }
    }

    /// Event name as it appears on the wire, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::ChatHistory { .. } => "chat_history",
            Self::StreamStart { .. } => "stream_start",
            Self::Token { .. } => "token",
            Self::StreamEnd { .. } => "stream_end",
            Self::ConversationTitleUpdated { .. } => "conversation_title_updated",
            Self::Error { .. } => "error",
            Self::WsClosed => "ws_closed",
            Self::Unrecognized(_) => "unrecognized",
        }
    }

    /// Banner text for an `error` event; `None` for every other variant.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Self::Error { content, message } => Some(
                content
                    .as_deref()
                    .or(message.as_deref())
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or(DEFAULT_ERROR_TEXT),
            ),
            _ => None,
        }
    }
}

/// Messages sent FROM the client TO the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Chat { message: String },
}

impl ClientMessage {
    pub fn chat(message: impl Into<String>) -> Self {
        Self::Chat {
            message: message.into(),
        }
    }

    /// The text frame to put on the wire.
    pub fn encode(&self) -> String {
        match self {
            Self::Chat { message } => {
                serde_json::json!({ "type": "chat", "message": message }).to_string()
            }
        }
    }
}

/// One frame as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Fold a raw frame into a canonical event. Never fails.
pub fn normalize(frame: &RawFrame) -> Option<ServerEvent> {
    match frame {
        RawFrame::Text(text) => normalize_text(text),
        RawFrame::Binary(bytes) => normalize_text(&String::from_utf8_lossy(bytes)),
    }
}

pub fn normalize_text(raw: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Some(normalize_json(value)),
        Err(_) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(ServerEvent::token(trimmed))
            }
        }
    }
}

enum Shape {
    Typed,
    Chunk { content: String, done: bool },
    Unknown,
}

fn classify(map: &Map<String, Value>) -> Shape {
    let typed = map
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.is_empty());
    if typed {
        return Shape::Typed;
    }

    let chunk = CHUNK_FIELDS
        .iter()
        .find_map(|field| map.get(*field).filter(|v| !v.is_null()));
    match chunk {
        Some(chunk) => Shape::Chunk {
            content: match chunk {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            done: is_true(map, "done") || is_true(map, "finished"),
        },
        None => Shape::Unknown,
    }
}

fn is_true(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool) == Some(true)
}

fn sources_of(value: &Value) -> Vec<String> {
    value
        .get("sources")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

fn normalize_json(value: Value) -> ServerEvent {
    let shape = match value.as_object() {
        Some(map) => classify(map),
        None => Shape::Unknown,
    };

    match shape {
        Shape::Typed => match ServerEvent::deserialize(&value) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!("unrecognized typed frame: {}", err);
                ServerEvent::Unrecognized(value)
            }
        },
        Shape::Chunk { done: true, .. } => ServerEvent::stream_end(sources_of(&value)),
        Shape::Chunk { content, .. } => ServerEvent::token(content),
        Shape::Unknown => ServerEvent::Unrecognized(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(raw: &str) -> Option<ServerEvent> {
        normalize(&RawFrame::Text(raw.to_string()))
    }

    // ── raw text ────────────────────────────────────────────────────────

    #[test]
    fn plain_text_becomes_token() {
        assert_eq!(text("hello"), Some(ServerEvent::token("hello")));
    }

    #[test]
    fn plain_text_is_trimmed() {
        assert_eq!(text("  hi there \n"), Some(ServerEvent::token("hi there")));
    }

    #[test]
    fn whitespace_frame_yields_nothing() {
        assert_eq!(text("   "), None);
        assert_eq!(text(""), None);
    }

    #[test]
    fn truncated_json_is_raw_text() {
        assert_eq!(
            text(r#"{"content": "abc""#),
            Some(ServerEvent::token(r#"{"content": "abc""#))
        );
    }

    #[test]
    fn binary_frame_follows_text_rules() {
        let frame = RawFrame::Binary(br#"{"delta":"x"}"#.to_vec());
        assert_eq!(normalize(&frame), Some(ServerEvent::token("x")));
    }

    // ── untyped JSON ────────────────────────────────────────────────────

    #[test]
    fn untyped_done_becomes_stream_end() {
        assert_eq!(
            text(r#"{"content":"abc","done":true,"sources":["doc1"]}"#),
            Some(ServerEvent::stream_end(vec!["doc1".into()]))
        );
    }

    #[test]
    fn untyped_finished_without_sources() {
        assert_eq!(
            text(r#"{"token":"z","finished":true}"#),
            Some(ServerEvent::stream_end(vec![]))
        );
    }

    #[test]
    fn done_must_be_literally_true() {
        assert_eq!(
            text(r#"{"content":"abc","done":"yes"}"#),
            Some(ServerEvent::token("abc"))
        );
    }

    #[test]
    fn chunk_field_precedence() {
        assert_eq!(
            text(r#"{"delta":"d","text":"t","token":"k","content":"c"}"#),
            Some(ServerEvent::token("c"))
        );
        assert_eq!(
            text(r#"{"delta":"d","text":"t","token":"k"}"#),
            Some(ServerEvent::token("k"))
        );
        assert_eq!(
            text(r#"{"delta":"d","text":"t"}"#),
            Some(ServerEvent::token("t"))
        );
    }

    #[test]
    fn null_chunk_falls_through_to_next_field() {
        assert_eq!(
            text(r#"{"content":null,"delta":"d"}"#),
            Some(ServerEvent::token("d"))
        );
    }

    #[test]
    fn empty_string_chunk_still_wins() {
        assert_eq!(
            text(r#"{"content":"","delta":"d"}"#),
            Some(ServerEvent::token(""))
        );
    }

    #[test]
    fn numeric_chunk_is_stringified() {
        assert_eq!(text(r#"{"token":42}"#), Some(ServerEvent::token("42")));
    }

    #[test]
    fn object_without_chunk_is_unrecognized() {
        assert_eq!(
            text(r#"{"status":"ok"}"#),
            Some(ServerEvent::Unrecognized(json!({"status": "ok"})))
        );
    }

    #[test]
    fn non_object_json_is_unrecognized() {
        assert_eq!(text("42"), Some(ServerEvent::Unrecognized(json!(42))));
        assert_eq!(text("null"), Some(ServerEvent::Unrecognized(Value::Null)));
        assert_eq!(
            text(r#"["a"]"#),
            Some(ServerEvent::Unrecognized(json!(["a"])))
        );
    }

    #[test]
    fn empty_type_is_treated_as_untyped() {
        assert_eq!(
            text(r#"{"type":"","content":"c"}"#),
            Some(ServerEvent::token("c"))
        );
    }

    // ── typed JSON ──────────────────────────────────────────────────────

    #[test]
    fn typed_session_started() {
        assert_eq!(
            text(r#"{"type":"session_started","session_id":"s1","conversation_id":"c1","new_conversation":true}"#),
            Some(ServerEvent::SessionStarted {
                session_id: Some("s1".into()),
                conversation_id: Some("c1".into()),
                new_conversation: true,
            })
        );
    }

    #[test]
    fn typed_session_started_defaults_to_resumed() {
        match text(r#"{"type":"session_started","session_id":"s1"}"#) {
            Some(ServerEvent::SessionStarted {
                new_conversation,
                conversation_id,
                ..
            }) => {
                assert!(!new_conversation);
                assert!(conversation_id.is_none());
            }
            other => panic!("expected session_started, got {other:?}"),
        }
    }

    #[test]
    fn typed_token_wins_over_chunk_rules() {
        assert_eq!(
            text(r#"{"type":"token","content":"abc","done":true}"#),
            Some(ServerEvent::token("abc"))
        );
    }

    #[test]
    fn typed_stream_end_with_null_sources() {
        assert_eq!(
            text(r#"{"type":"stream_end","sources":null}"#),
            Some(ServerEvent::stream_end(vec![]))
        );
    }

    #[test]
    fn typed_stream_end_with_metadata() {
        let event = text(
            r#"{"type":"stream_end","sources":["a.pdf"],"kind":"guardrail_oos","follow_ups":["More?"],
                "citations":[{"title":"Deck","year":"2023","type":"proposal","confidence":0.8,"page":"2"}]}"#,
        );
        match event {
            Some(ServerEvent::StreamEnd {
                sources,
                kind,
                citations,
                follow_ups,
            }) => {
                assert_eq!(sources, vec!["a.pdf".to_string()]);
                assert_eq!(kind, Some(MessageKind::GuardrailOos));
                assert_eq!(citations.len(), 1);
                assert_eq!(follow_ups, vec!["More?".to_string()]);
            }
            other => panic!("expected stream_end, got {other:?}"),
        }
    }

    #[test]
    fn typed_chat_history() {
        let event = text(
            r#"{"type":"chat_history","messages":[
                {"role":"user","content":"hi"},
                {"role":"assistant","content":"hello","sources":["x.pdf"]}]}"#,
        );
        assert_eq!(
            event,
            Some(ServerEvent::ChatHistory {
                messages: vec![
                    HistoryEntry {
                        role: Role::User,
                        content: "hi".into(),
                        sources: vec![],
                    },
                    HistoryEntry {
                        role: Role::Assistant,
                        content: "hello".into(),
                        sources: vec!["x.pdf".into()],
                    },
                ]
            })
        );
    }

    #[test]
    fn typed_ws_closed_is_accepted() {
        assert_eq!(text(r#"{"type":"ws_closed"}"#), Some(ServerEvent::WsClosed));
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        let raw = json!({"type": "typing_indicator", "on": true});
        assert_eq!(
            text(&raw.to_string()),
            Some(ServerEvent::Unrecognized(raw))
        );
    }

    #[test]
    fn wire_cannot_forge_unrecognized_tag() {
        let raw = json!({"type": "unrecognized"});
        assert_eq!(
            text(&raw.to_string()),
            Some(ServerEvent::Unrecognized(raw))
        );
    }

    #[test]
    fn typed_token_with_object_content_is_still_a_token() {
        assert_eq!(
            text(r#"{"type":"token","content":{"nested":true}}"#),
            Some(ServerEvent::token(""))
        );
        assert_eq!(
            text(r#"{"type":"token","content":7}"#),
            Some(ServerEvent::token("7"))
        );
    }

    #[test]
    fn stream_end_with_numeric_citation_fields_still_ends_the_stream() {
        let event = text(
            r#"{"type":"stream_end","sources":["deck.pdf",3],
                "citations":[{"title":"Deck","year":2024,"type":"proposal","confidence":0.7,"page":2},"junk"]}"#,
        );
        match event {
            Some(ServerEvent::StreamEnd {
                sources, citations, ..
            }) => {
                assert_eq!(sources, vec!["deck.pdf".to_string()]);
                assert_eq!(citations.len(), 1);
                assert_eq!(citations[0].year, "2024");
                assert_eq!(citations[0].page, "2");
            }
            other => panic!("expected stream_end, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_dropped_not_the_frame() {
        assert_eq!(
            text(r#"{"type":"stream_end","kind":"guardrail_pii"}"#),
            Some(ServerEvent::stream_end(vec![]))
        );
        assert_eq!(
            text(r#"{"type":"stream_start","kind":"guardrail_pii","sources":"a.pdf"}"#),
            Some(ServerEvent::StreamStart {
                sources: vec![],
                kind: None,
            })
        );
    }

    #[test]
    fn error_with_object_content_falls_back_to_default_text() {
        let event = text(r#"{"type":"error","content":{"detail":"quota"}}"#).unwrap();
        assert_eq!(event.name(), "error");
        assert_eq!(event.error_text(), Some(DEFAULT_ERROR_TEXT));

        let event = text(r#"{"type":"error","content":{"detail":"quota"},"message":"quota"}"#);
        assert_eq!(event.unwrap().error_text(), Some("quota"));
    }

    #[test]
    fn history_skips_entries_with_unknown_roles() {
        let event = text(
            r#"{"type":"chat_history","messages":[
                {"role":"system","content":"You are helpful"},
                {"role":"user","content":"hi","sources":null}]}"#,
        );
        assert_eq!(
            event,
            Some(ServerEvent::ChatHistory {
                messages: vec![HistoryEntry {
                    role: Role::User,
                    content: "hi".into(),
                    sources: vec![],
                }]
            })
        );
    }

    #[test]
    fn session_started_with_numeric_ids() {
        assert_eq!(
            text(r#"{"type":"session_started","session_id":12,"new_conversation":"yes"}"#),
            Some(ServerEvent::SessionStarted {
                session_id: None,
                conversation_id: None,
                new_conversation: false,
            })
        );
    }

    #[test]
    fn error_text_prefers_content_then_message() {
        assert_eq!(
            text(r#"{"type":"error","content":"rate limited"}"#)
                .unwrap()
                .error_text(),
            Some("rate limited")
        );
        assert_eq!(
            text(r#"{"type":"error","message":"boom"}"#)
                .unwrap()
                .error_text(),
            Some("boom")
        );
        assert_eq!(
            text(r#"{"type":"error"}"#).unwrap().error_text(),
            Some(DEFAULT_ERROR_TEXT)
        );
        assert_eq!(ServerEvent::WsClosed.error_text(), None);
    }

    // ── outbound ────────────────────────────────────────────────────────

    #[test]
    fn chat_envelope_shape() {
        let frame = ClientMessage::chat("What case studies do we have?").encode();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "chat", "message": "What case studies do we have?"})
        );
        let decoded: ClientMessage = serde_json::from_str(&frame).unwrap();
        assert_eq!(decoded, ClientMessage::chat("What case studies do we have?"));
    }
}
