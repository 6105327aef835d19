//! Request envelopes written to `keybase chat api`.

use serde::Serialize;

use crate::chat::Channel;

/// Result literal the CLI answers a successful send with.
pub const MESSAGE_SENT: &str = "message sent";
/// Result literal the CLI answers a successful reaction with.
pub const MESSAGE_REACTED: &str = "message reacted to";
/// Result literal the CLI answers a successful delete with.
pub const MESSAGE_DELETED: &str = "message deleted";

/// A single API request, serialized as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    method: Method,
    params: Params,
}

/// The API method being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Send,
    Reaction,
    Delete,
}

impl Method {
    /// The result literal a successful call of this method produces.
    pub fn expected_result(self) -> &'static str {
        match self {
            Method::Send => MESSAGE_SENT,
            Method::Reaction => MESSAGE_REACTED,
            Method::Delete => MESSAGE_DELETED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Params {
    options: Options,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Options {
    channel: ChannelSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<Body>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Body {
    body: String,
}

/// Wire form of a destination channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct ChannelSpec {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    members_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic_name: Option<String>,
}

impl From<&Channel> for ChannelSpec {
    fn from(channel: &Channel) -> Self {
        match channel.team() {
            Some(team) => ChannelSpec {
                name: team.name().to_string(),
                members_type: Some("team"),
                topic_name: Some(channel.name().to_string()),
            },
            None => ChannelSpec {
                name: channel.name().to_string(),
                members_type: None,
                topic_name: None,
            },
        }
    }
}

impl ApiRequest {
    /// Post `text` to `channel`.
    pub fn send(channel: &Channel, text: &str) -> Self {
        Self::build(Method::Send, channel, None, Some(text), None)
    }

    /// Post `text` to `channel` as a reply to message `reply_to`.
    pub fn reply(channel: &Channel, text: &str, reply_to: u64) -> Self {
        Self::build(Method::Send, channel, None, Some(text), Some(reply_to))
    }

    /// Attach reaction `body` to message `message_id`.
    pub fn reaction(channel: &Channel, message_id: u64, body: &str) -> Self {
        Self::build(Method::Reaction, channel, Some(message_id), Some(body), None)
    }

    /// Delete message `message_id`.
    pub fn delete(channel: &Channel, message_id: u64) -> Self {
        Self::build(Method::Delete, channel, Some(message_id), None, None)
    }

    fn build(
        method: Method,
        channel: &Channel,
        message_id: Option<u64>,
        body: Option<&str>,
        reply_to: Option<u64>,
    ) -> Self {
        Self {
            method,
            params: Params {
                options: Options {
                    channel: channel.into(),
                    message_id,
                    message: body.map(|b| Body {
                        body: b.to_string(),
                    }),
                    reply_to,
                },
            },
        }
    }

    /// The method this request invokes.
    pub fn method(&self) -> Method {
        self.method
    }

    /// Encode as a single JSON line (without the trailing newline).
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Team;
    use serde_json::{json, Value};

    fn encode(request: &ApiRequest) -> Value {
        serde_json::from_str(&request.to_line().unwrap()).unwrap()
    }

    #[test]
    fn send_to_plain_channel() {
        let request = ApiRequest::send(&Channel::new("alice,bob"), "hello \"there\"\n");
        assert_eq!(
            encode(&request),
            json!({
                "method": "send",
                "params": {"options": {
                    "channel": {"name": "alice,bob"},
                    "message": {"body": "hello \"there\"\n"}
                }}
            })
        );
        assert!(!request.to_line().unwrap().contains('\n'));
    }

    #[test]
    fn send_to_team_channel() {
        let channel = Channel::in_team(Team::new("acme"), "general");
        assert_eq!(
            encode(&ApiRequest::send(&channel, "hi"))["params"]["options"]["channel"],
            json!({"name": "acme", "members_type": "team", "topic_name": "general"})
        );
    }

    #[test]
    fn reply_carries_reply_to() {
        let request = ApiRequest::reply(&Channel::new("general"), "ok", 42);
        assert_eq!(encode(&request)["params"]["options"]["reply_to"], json!(42));
        assert_eq!(request.method(), Method::Send);
    }

    #[test]
    fn reaction_and_delete() {
        let channel = Channel::new("general");
        let reaction = encode(&ApiRequest::reaction(&channel, 7, ":+1:"));
        assert_eq!(reaction["method"], "reaction");
        assert_eq!(reaction["params"]["options"]["message_id"], json!(7));
        assert_eq!(reaction["params"]["options"]["message"]["body"], ":+1:");

        let delete = encode(&ApiRequest::delete(&channel, 7));
        assert_eq!(delete["method"], "delete");
        assert_eq!(delete["params"]["options"]["message_id"], json!(7));
        assert!(delete["params"]["options"].get("message").is_none());
    }

    #[test]
    fn expected_results() {
        assert_eq!(Method::Send.expected_result(), "message sent");
        assert_eq!(Method::Reaction.expected_result(), "message reacted to");
        assert_eq!(Method::Delete.expected_result(), "message deleted");
    }
}
