//! Event lines streamed by `keybase chat api-listen`.
//!
//! Only the fields this library consumes are declared; everything else in the
//! envelope is ignored and every declared field tolerates being absent.

use std::time::Instant;

use serde::Deserialize;

use crate::chat::{CachedEntry, Channel, ContentType, MessageId, Team, User};
use crate::{Error, Result};

/// One decoded event line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IncomingEvent {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub msg: Option<EventMessage>,
}

/// The `msg` block of an event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub channel: EventChannel,
    #[serde(default)]
    pub sender: EventSender,
    #[serde(default)]
    pub content: EventContent,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventChannel {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members_type: Option<String>,
    #[serde(default)]
    pub topic_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventSender {
    #[serde(default)]
    pub username: String,
}

/// Tagged content; the tag is kept as a string so unknown tags still decode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventContent {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextContent>,
    #[serde(default)]
    pub reaction: Option<ReactionContent>,
    #[serde(default)]
    pub delete: Option<DeleteContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub body: String,
}

/// Reaction content: `m` is the target sequence number, `b` the body.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReactionContent {
    #[serde(default)]
    pub m: u64,
    #[serde(default)]
    pub b: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeleteContent {
    #[serde(default, rename = "messageIDs")]
    pub message_ids: Vec<u64>,
}

impl IncomingEvent {
    /// Decode an event line.
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| Error::json_parse(e, line))
    }

    /// The content classification, `Unknown` when there is no message block.
    pub fn content_type(&self) -> ContentType {
        self.msg
            .as_ref()
            .map(|m| ContentType::from_tag(&m.content.kind))
            .unwrap_or(ContentType::Unknown)
    }

    /// Build a cache entry stamped with `received_at`.
    ///
    /// Returns `None` for events without a message block or with an invalid
    /// id.
    pub fn to_entry(&self, received_at: Instant) -> Option<CachedEntry> {
        let msg = self.msg.as_ref()?;
        let id = MessageId::new(msg.conversation_id.as_str(), msg.id);
        if !id.is_valid() {
            return None;
        }

        let content_type = ContentType::from_tag(&msg.content.kind);
        let (body, reaction_target) = match content_type {
            ContentType::Reaction => {
                let reaction = msg.content.reaction.as_ref();
                (
                    reaction.map(|r| r.b.clone()).unwrap_or_default(),
                    reaction.map(|r| MessageId::new(msg.conversation_id.as_str(), r.m)),
                )
            }
            _ => (
                msg.content
                    .text
                    .as_ref()
                    .map(|t| t.body.clone())
                    .unwrap_or_default(),
                None,
            ),
        };

        Some(CachedEntry {
            id,
            channel: msg.channel.to_channel(),
            sender: User::new(&msg.sender.username),
            content_type,
            body,
            reaction_target,
            received_at,
        })
    }

    /// Append the ids a delete event targets to `out`.
    ///
    /// Returns `false` if the event carries no delete block.
    pub fn delete_targets(&self, out: &mut Vec<MessageId>) -> bool {
        let Some(msg) = self.msg.as_ref() else {
            return false;
        };
        let Some(delete) = msg.content.delete.as_ref() else {
            return false;
        };
        out.extend(
            delete
                .message_ids
                .iter()
                .map(|&seq| MessageId::new(msg.conversation_id.as_str(), seq)),
        );
        true
    }
}

impl EventChannel {
    /// Team channels carry the team in `name` and the channel in `topic_name`.
    pub fn to_channel(&self) -> Channel {
        let is_team = self
            .members_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("team"));
        match (is_team, &self.topic_name) {
            (true, Some(topic)) => Channel::in_team(Team::new(&self.name), topic.as_str()),
            _ => Channel::new(self.name.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = r#"{"type":"chat","source":"remote","msg":{"id":12,"conversation_id":"abc","channel":{"name":"alice,me","members_type":"impteamnative","topic_type":"chat"},"sender":{"uid":"u1","username":"Alice","device_name":"phone"},"sent_at":1600000000,"content":{"type":"text","text":{"body":"hello","userMentions":null}}}}"#;

    #[test]
    fn decodes_text_event() {
        let event = IncomingEvent::parse(TEXT).unwrap();
        assert_eq!(event.content_type(), ContentType::Text);

        let entry = event.to_entry(Instant::now()).unwrap();
        assert_eq!(entry.id, MessageId::new("abc", 12));
        assert_eq!(entry.channel, Channel::new("alice,me"));
        assert_eq!(entry.sender, User::new("alice"));
        assert_eq!(entry.body, "hello");
        assert!(entry.reaction_target.is_none());
    }

    #[test]
    fn decodes_team_reaction() {
        let line = r#"{"type":"chat","msg":{"id":13,"conversation_id":"abc","channel":{"name":"acme","members_type":"team","topic_name":"general"},"sender":{"username":"bob"},"content":{"type":"reaction","reaction":{"m":12,"b":":+1:"}}}}"#;
        let event = IncomingEvent::parse(line).unwrap();
        assert_eq!(event.content_type(), ContentType::Reaction);

        let entry = event.to_entry(Instant::now()).unwrap();
        assert_eq!(entry.channel, Channel::in_team(Team::new("acme"), "general"));
        assert_eq!(entry.body, ":+1:");
        assert_eq!(entry.reaction_target, Some(MessageId::new("abc", 12)));
    }

    #[test]
    fn decodes_delete_targets() {
        let line = r#"{"type":"chat","msg":{"id":20,"conversation_id":"abc","content":{"type":"delete","delete":{"messageIDs":[3,4]}}}}"#;
        let event = IncomingEvent::parse(line).unwrap();
        assert_eq!(event.content_type(), ContentType::Delete);

        let mut ids = Vec::new();
        assert!(event.delete_targets(&mut ids));
        assert_eq!(ids, vec![MessageId::new("abc", 3), MessageId::new("abc", 4)]);
    }

    #[test]
    fn unknown_tag_and_missing_fields() {
        let event = IncomingEvent::parse(r#"{"type":"chat","msg":{"content":{"type":"attachment"}}}"#)
            .unwrap();
        assert_eq!(event.content_type(), ContentType::Unknown);
        // Sequence 0 is not a valid id.
        assert!(event.to_entry(Instant::now()).is_none());

        let empty = IncomingEvent::parse("{}").unwrap();
        assert_eq!(empty.content_type(), ContentType::Unknown);
        assert!(!empty.delete_targets(&mut Vec::new()));
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            IncomingEvent::parse("Listening for chat notifications."),
            Err(Error::JsonParse { .. })
        ));
    }
}
