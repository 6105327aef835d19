//! JSON protocol types for keybase chat CLI communication.
//!
//! Every exchange is one JSON object per line:
//!
//! - [`ApiRequest`]: written to `keybase chat api` (send, reaction, delete)
//! - [`ApiResponse`]: the single reply line, classified into an [`Outcome`]
//! - [`IncomingEvent`]: streamed by `keybase chat api-listen`
//!
//! # Example
//!
//! ```
//! use libkeybase::chat::Channel;
//! use libkeybase::protocol::{classify_line, ApiRequest, Outcome};
//!
//! let line = ApiRequest::send(&Channel::new("alice,bob"), "hi").to_line().unwrap();
//! assert!(line.starts_with(r#"{"method":"send""#));
//!
//! let reply = r#"{"result":{"message":"message sent","id":4}}"#;
//! assert_eq!(classify_line(reply), Outcome::Result("message sent".into()));
//! ```

mod incoming;
mod outgoing;
mod response;

pub use incoming::{
    DeleteContent, EventChannel, EventContent, EventMessage, EventSender, IncomingEvent,
    ReactionContent, TextContent,
};
pub use outgoing::{ApiRequest, Method, MESSAGE_DELETED, MESSAGE_REACTED, MESSAGE_SENT};
pub use response::{
    classify_line, expect_result, ApiError, ApiResponse, ApiResult, Outcome,
};
