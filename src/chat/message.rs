//! Message identifiers, cached snapshots and the handles observers receive.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

use super::channel::{Channel, User};
use crate::cache::MessageCache;

/// Identifies a message within a conversation.
///
/// Equality and hashing use only a composite hash of the conversation id and
/// sequence number, computed once at construction.
#[derive(Debug, Clone)]
pub struct MessageId {
    conversation_id: Arc<str>,
    sequence: u64,
    hash: u64,
}

impl MessageId {
    /// Create an identifier from a conversation id and sequence number.
    pub fn new(conversation_id: impl Into<Arc<str>>, sequence: u64) -> Self {
        let conversation_id = conversation_id.into();
        let mut hasher = DefaultHasher::new();
        conversation_id.hash(&mut hasher);
        sequence.hash(&mut hasher);
        Self {
            conversation_id,
            sequence,
            hash: hasher.finish(),
        }
    }

    /// The conversation this message belongs to.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// The per-conversation sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sequence numbers start at 1; zero marks an absent id.
    pub fn is_valid(&self) -> bool {
        self.sequence > 0
    }
}

impl PartialEq for MessageId {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for MessageId {}

impl Hash for MessageId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.conversation_id, self.sequence)
    }
}

/// Classification of an incoming event's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// A plain text message.
    Text,
    /// A reaction attached to another message.
    Reaction,
    /// An edit of an earlier message.
    Edit,
    /// Deletion of one or more messages.
    Delete,
    /// Any tag this library does not know.
    Unknown,
}

impl ContentType {
    /// Parse a wire tag, ignoring case. Unrecognized tags map to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "text" => ContentType::Text,
            "reaction" => ContentType::Reaction,
            "edit" => ContentType::Edit,
            "delete" => ContentType::Delete,
            _ => ContentType::Unknown,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ContentType::Text => "text",
            ContentType::Reaction => "reaction",
            ContentType::Edit => "edit",
            ContentType::Delete => "delete",
            ContentType::Unknown => "unknown",
        };
        f.write_str(tag)
    }
}

/// Snapshot of a received message or reaction, as held by the cache.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    /// Identifier of this message (for reactions, of the reaction itself).
    pub id: MessageId,
    /// Where the message was posted.
    pub channel: Channel,
    /// Who posted it.
    pub sender: User,
    /// Text or Reaction for anything the listener caches.
    pub content_type: ContentType,
    /// Message text, or the reaction body.
    pub body: String,
    /// The message a reaction is attached to.
    pub reaction_target: Option<MessageId>,
    /// When the cache accepted this entry. Drives eviction only.
    pub received_at: Instant,
}

impl CachedEntry {
    /// Compare every field except the receipt stamp.
    pub fn same_payload(&self, other: &CachedEntry) -> bool {
        self.id == other.id
            && self.id.conversation_id() == other.id.conversation_id()
            && self.channel == other.channel
            && self.sender == other.sender
            && self.content_type == other.content_type
            && self.body == other.body
            && self.reaction_target == other.reaction_target
    }

    /// Check whether this entry is a reaction attached to `target`.
    pub fn is_reaction_to(&self, target: &MessageId) -> bool {
        self.content_type == ContentType::Reaction && self.reaction_target.as_ref() == Some(target)
    }
}

/// A received text message, readable from the cache while it is retained.
#[derive(Clone)]
pub struct Message {
    id: MessageId,
    cache: Arc<MessageCache>,
}

impl Message {
    pub(crate) fn new(id: MessageId, cache: Arc<MessageCache>) -> Self {
        Self { id, cache }
    }

    /// The message identifier.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Read the cached snapshot, if it has not been evicted or deleted.
    pub fn read(&self) -> Option<Arc<CachedEntry>> {
        self.cache.get(&self.id)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message").field("id", &self.id).finish()
    }
}

/// A received reaction, readable from the cache while it is retained.
#[derive(Clone)]
pub struct Reaction {
    id: MessageId,
    cache: Arc<MessageCache>,
}

impl Reaction {
    pub(crate) fn new(id: MessageId, cache: Arc<MessageCache>) -> Self {
        Self { id, cache }
    }

    /// The identifier of the reaction itself.
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    /// Read the cached snapshot.
    pub fn read(&self) -> Option<Arc<CachedEntry>> {
        self.cache.get(&self.id)
    }

    /// The message this reaction is attached to.
    pub fn target(&self) -> Option<MessageId> {
        self.read().and_then(|entry| entry.reaction_target.clone())
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction").field("id", &self.id).finish()
    }
}
