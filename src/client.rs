//! High-level keybase chat client.
//!
//! This module provides [`KeybaseClient`], the main entry point. It wires the
//! worker pool, the shared listener and the message cache together and
//! exposes chat operations on top of them.
//!
//! # Example
//!
//! ```ignore
//! use libkeybase::{ClientConfig, KeybaseClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = KeybaseClient::connect(ClientConfig::builder().build()?).await?;
//!
//!     if !client.ping().await {
//!         eprintln!("keybase service is not running");
//!     }
//!
//!     let channel = client.self_channel();
//!     client.send_message(&channel, "hello from libkeybase").await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::cache::{IdBatchPool, MessageCache};
use crate::chat::{CachedEntry, Channel, Message, MessageId, User};
use crate::config::{ClientConfig, Environment};
use crate::listen::{ChatObserver, ConversationObserver, EventListener, ListenHandle, ListenerRegistry};
use crate::process::{with_timeout, ProcessSpec, WorkerPool};
use crate::protocol::ApiRequest;
use crate::question::Question;
use crate::request::RequestChannel;
use crate::Result;

/// Status suffix `keybase ping` prints when the service answers.
const PING_UP_SUFFIX: &str = " is up";

struct ClientInner {
    config: ClientConfig,
    env: Environment,
    requests: RequestChannel,
    cache: Arc<MessageCache>,
    batches: Arc<IdBatchPool>,
    registry: Arc<ListenerRegistry>,
    listen_spec: ProcessSpec,
    ping_spec: ProcessSpec,
}

/// A client for one keybase account.
///
/// Cloning is cheap; clones share the worker pool, the cache and the
/// listener registry.
///
/// # Failure reporting
///
/// Chat operations return `bool`: failures are logged through `tracing` and
/// reported as `false`. Only construction and [`Question`] setup return
/// [`Result`].
#[derive(Clone)]
pub struct KeybaseClient {
    inner: Arc<ClientInner>,
}

impl KeybaseClient {
    /// Locate keybase and create a client.
    ///
    /// # Errors
    ///
    /// Returns a locator error if the binary or account cannot be resolved.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let env = Environment::detect(&config).await?;
        Ok(Self::with_environment(config, env))
    }

    /// Create a client for an already resolved environment.
    ///
    /// No process is started until the first request or listener.
    pub fn with_environment(config: ClientConfig, env: Environment) -> Self {
        let api_spec = env.spec(&config, config.api_args());
        let listen_spec = env.spec(&config, config.listen_args());
        let ping_spec = env.spec(&config, config.ping_args());

        let pool = Arc::new(WorkerPool::new(api_spec, config.pool_size()));
        let requests = RequestChannel::new(pool, config.request_timeout());
        let cache = Arc::new(MessageCache::new(config.cache_capacity(), config.cache_resize()));
        let batches = Arc::new(IdBatchPool::new(config.id_batch_pool_size()));
        let registry = ListenerRegistry::new(EventListener::new(
            listen_spec.clone(),
            Arc::clone(&cache),
            Arc::clone(&batches),
        ));

        Self {
            inner: Arc::new(ClientInner {
                config,
                env,
                requests,
                cache,
                batches,
                registry,
                listen_spec,
                ping_spec,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The resolved binary and account.
    pub fn environment(&self) -> &Environment {
        &self.inner.env
    }

    /// The account this client acts as.
    pub fn user(&self) -> &User {
        self.inner.env.user()
    }

    /// The request channel used for outgoing operations.
    pub fn requests(&self) -> &RequestChannel {
        &self.inner.requests
    }

    /// The shared message cache.
    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.inner.cache
    }

    /// The shared listener registry.
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.inner.registry
    }

    /// The account's conversation with itself.
    pub fn self_channel(&self) -> Channel {
        Channel::self_channel(self.user())
    }

    /// The direct conversation between `other` and this account.
    pub fn direct_channel(&self, other: &User) -> Channel {
        Channel::direct(other, self.user())
    }

    // -------------------------------------------------------------------------
    // Outgoing
    // -------------------------------------------------------------------------

    /// Post `text` to `channel`.
    pub async fn send_message(&self, channel: &Channel, text: &str) -> bool {
        if !channel.is_valid() {
            tracing::error!("send_message: invalid channel");
            return false;
        }
        self.inner.requests.call(&ApiRequest::send(channel, text)).await
    }

    /// Post `text` addressed to `user`.
    ///
    /// The text is prefixed with `@user: ` unless `channel` is the direct
    /// conversation between `user` and this account.
    pub async fn send_message_to(&self, channel: &Channel, user: &User, text: &str) -> bool {
        if channel.is_direct_between(user, self.user()) {
            self.send_message(channel, text).await
        } else {
            self.send_message(channel, &format!("@{}: {}", user, text)).await
        }
    }

    /// Reply to a cached message in its own conversation.
    pub async fn reply(&self, message: &Message, text: &str) -> bool {
        let Some(entry) = message.read() else {
            tracing::error!(id = %message.id(), "reply: source message not cached");
            return false;
        };
        self.inner
            .requests
            .call(&ApiRequest::reply(&entry.channel, text, entry.id.sequence()))
            .await
    }

    /// React to a cached message with `reaction`.
    pub async fn react(&self, message: &Message, reaction: &str) -> bool {
        let Some(entry) = message.read() else {
            tracing::error!(id = %message.id(), "react: message not cached");
            return false;
        };
        self.react_in(&entry.channel, &entry.id, reaction).await
    }

    /// React to message `id` in `channel` with `reaction`.
    pub async fn react_in(&self, channel: &Channel, id: &MessageId, reaction: &str) -> bool {
        self.inner
            .requests
            .call(&ApiRequest::reaction(channel, id.sequence(), reaction))
            .await
    }

    /// Delete a cached message.
    pub async fn delete(&self, message: &Message) -> bool {
        let Some(entry) = message.read() else {
            tracing::error!(id = %message.id(), "delete: message not cached");
            return false;
        };
        self.delete_in(&entry.channel, &entry.id).await
    }

    /// Delete message `id` in `channel`.
    pub async fn delete_in(&self, channel: &Channel, id: &MessageId) -> bool {
        self.inner
            .requests
            .call(&ApiRequest::delete(channel, id.sequence()))
            .await
    }

    /// Delete several messages in `channel` concurrently. Succeeds only if
    /// every delete does.
    pub async fn delete_batch(&self, channel: &Channel, ids: &[MessageId]) -> bool {
        self.all_succeed(ids.iter().map(|id| self.delete_in(channel, id)))
            .await
    }

    /// Run `requests` with no more in flight than the pool has workers, so
    /// none of them waits out its timeout in the lease queue.
    pub(crate) async fn all_succeed<I, F>(&self, requests: I) -> bool
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = bool>,
    {
        let limit = self.inner.requests.pool().size().max(1);
        stream::iter(requests)
            .buffer_unordered(limit)
            .collect::<Vec<bool>>()
            .await
            .into_iter()
            .all(|ok| ok)
    }

    // -------------------------------------------------------------------------
    // Incoming
    // -------------------------------------------------------------------------

    /// Start a dedicated listen process reporting to `observer`.
    ///
    /// Events are cached in the shared cache. Returns `None` if the process
    /// could not be started; `observer.on_error()` has been called by then.
    pub fn listen(&self, observer: Arc<dyn ChatObserver>) -> Option<ListenHandle> {
        EventListener::new(
            self.inner.listen_spec.clone(),
            Arc::clone(&self.inner.cache),
            Arc::clone(&self.inner.batches),
        )
        .listen(observer)
    }

    /// Observe `channel` through the shared listener.
    pub fn add_listener(&self, channel: &Channel, observer: &Arc<dyn ConversationObserver>) {
        self.inner.registry.add_listener(channel.name(), observer);
    }

    /// Stop observing `channel`.
    pub fn remove_listener(&self, channel: &Channel, observer: &Arc<dyn ConversationObserver>) {
        self.inner.registry.remove_listener(channel.name(), observer);
    }

    /// A message handle reading from the shared cache.
    pub fn message(&self, id: MessageId) -> Message {
        Message::new(id, Arc::clone(&self.inner.cache))
    }

    /// Read a cached message or reaction.
    pub fn read_from_cache(&self, id: &MessageId) -> Option<Arc<CachedEntry>> {
        self.inner.cache.get(id)
    }

    /// Remove and return a cached message or reaction.
    pub fn remove_from_cache(&self, id: &MessageId) -> Option<Arc<CachedEntry>> {
        self.inner.cache.take(id)
    }

    /// Cached reactions targeting `id`.
    pub fn reactions_to(&self, id: &MessageId) -> Vec<Arc<CachedEntry>> {
        self.inner.cache.reactions_to(id)
    }

    /// Number of cached reactions targeting `id`.
    pub fn count_reactions(&self, id: &MessageId) -> usize {
        self.inner.cache.count_reactions(id)
    }

    // -------------------------------------------------------------------------
    // Questions
    // -------------------------------------------------------------------------

    /// A question with the default prompt. See [`Question::new`].
    pub fn question<I, S>(&self, channel: Channel, target: User, options: I) -> Result<Question>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Question::new(self, channel, target, options)
    }

    /// A question posting `text`. See [`Question::with_text`].
    pub fn question_with_text<I, S>(
        &self,
        channel: Channel,
        target: User,
        text: impl Into<String>,
        options: I,
    ) -> Result<Question>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Question::with_text(self, channel, target, text, options)
    }

    /// A question adopting a cached message. See [`Question::with_message`].
    pub fn question_about<I, S>(&self, message: &MessageId, target: User, options: I) -> Result<Question>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Question::with_message(self, message, target, options)
    }

    // -------------------------------------------------------------------------
    // Connectivity
    // -------------------------------------------------------------------------

    /// Check that the keybase service answers.
    ///
    /// Succeeds when `keybase ping` reports the service as up on its error
    /// stream before it exits or the request timeout passes.
    pub async fn ping(&self) -> bool {
        let timeout = self.inner.config.request_timeout();
        match with_timeout(timeout, self.run_ping()).await {
            Ok(up) => up,
            Err(e) => {
                tracing::error!(error = %e, "ping failed");
                false
            }
        }
    }

    async fn run_ping(&self) -> Result<bool> {
        let mut process = self.inner.ping_spec.spawn()?;
        let Some(mut stderr) = process.take_stderr_reader() else {
            return Ok(false);
        };
        while let Some(line) = stderr.next_line().await? {
            tracing::debug!(%line, "ping");
            if line.to_lowercase().ends_with(PING_UP_SUFFIX) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl std::fmt::Debug for KeybaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeybaseClient")
            .field("user", self.user())
            .field("binary", &self.inner.env.binary_path())
            .field("pool_size", &self.inner.config.pool_size())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}
