//! Incoming event handling.
//!
//! - [`EventListener`] owns the `keybase chat api-listen` process, caches
//!   every text and reaction event and reports it to one [`ChatObserver`]
//! - [`ListenerRegistry`] shares that one listener between many
//!   [`ConversationObserver`]s and restarts it when it fails
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use libkeybase::listen::ConversationObserver;
//! use libkeybase::chat::{CachedEntry, Message};
//!
//! struct Printer;
//!
//! impl ConversationObserver for Printer {
//!     fn on_message(&self, _message: &Message, entry: &CachedEntry) {
//!         println!("{}: {}", entry.sender, entry.body);
//!     }
//! }
//!
//! let printer: Arc<dyn ConversationObserver> = Arc::new(Printer);
//! client.add_listener("general", &printer);
//! ```

mod listener;
mod registry;

pub use listener::{ChatObserver, DeletePolicy, EventListener, ListenHandle, LISTEN_START_LINE};
pub use registry::{ConversationObserver, ListenerRegistry};
