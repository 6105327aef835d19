//! # libkeybase
//!
//! Async Rust client for keybase chat, driven through the `keybase` CLI.
//!
//! This library provides:
//! - A pool of long-lived `keybase chat api` workers with per-request timeouts
//! - A listener over `keybase chat api-listen` that caches every message and
//!   reaction it sees
//! - Per-conversation observers sharing one listener process
//! - Questions answered by reaction
//!
//! ## Quick Start
//!
//! ```ignore
//! use libkeybase::{ClientConfig, KeybaseClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = KeybaseClient::connect(ClientConfig::builder().build()?).await?;
//!     client.send_message(&client.self_channel(), "hello").await;
//!     Ok(())
//! }
//! ```
//!
//! ## Listening
//!
//! ```ignore
//! use std::sync::Arc;
//! use libkeybase::{CachedEntry, ConversationObserver, Message};
//!
//! struct Echo;
//!
//! impl ConversationObserver for Echo {
//!     fn on_message(&self, _message: &Message, entry: &CachedEntry) {
//!         println!("{}: {}", entry.sender, entry.body);
//!     }
//! }
//!
//! let echo: Arc<dyn ConversationObserver> = Arc::new(Echo);
//! client.add_listener(&client.self_channel(), &echo);
//! ```
//!
//! ## Questions
//!
//! ```ignore
//! use libkeybase::{PromptBehaviour, User};
//!
//! let alice = User::new("alice");
//! let question = client.question_with_text(
//!     client.direct_channel(&alice),
//!     alice,
//!     "Deploy now?",
//!     ["yes", "no"],
//! )?;
//! if question.ask().await {
//!     let answer = question.get_response(PromptBehaviour::Replace).await;
//! }
//! ```

pub mod cache;
pub mod chat;
mod client;
pub mod config;
mod error;
pub mod listen;
pub mod process;
pub mod protocol;
mod question;
pub mod request;

pub use error::{Error, Result};

// Re-export the main client types at crate root
pub use client::KeybaseClient;
pub use question::{Answer, PromptBehaviour, Question, QuestionState, DEFAULT_PROMPT};
pub use request::RequestChannel;

// Re-export commonly used chat types at crate root
pub use chat::{CachedEntry, Channel, ContentType, Message, MessageId, Reaction, Team, User};

// Re-export commonly used config types at crate root
pub use config::{ClientConfig, ClientConfigBuilder, Environment};

// Re-export commonly used listener types at crate root
pub use listen::{ChatObserver, ConversationObserver, DeletePolicy, ListenHandle, ListenerRegistry};

// Re-export commonly used cache types at crate root
pub use cache::{IdBatchPool, MessageCache};
