//! Chat value types shared by every layer.
//!
//! - [`Channel`], [`Team`] and [`User`] describe destinations and accounts
//! - [`MessageId`] identifies a message within a conversation
//! - [`CachedEntry`] is the snapshot the cache keeps of each received event
//! - [`Message`] and [`Reaction`] are the handles observers receive

mod channel;
mod message;

pub use channel::{Channel, Team, User};
pub use message::{CachedEntry, ContentType, Message, MessageId, Reaction};
