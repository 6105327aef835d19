//! Interactive questions answered by reaction.
//!
//! A [`Question`] posts a prompt (or adopts an existing message), attaches
//! one reaction per option and then waits for the target user to pick one.
//!
//! ```text
//! Idle ──ask()──▶ Asking ──prompt seen──▶ AwaitingAnswer ──reaction──▶ Resolved
//!                   │                          │
//!                   └─────────cancel()─────────┴──────────────────────▶ Cancelled
//! ```
//!
//! # Example
//!
//! ```ignore
//! use libkeybase::{PromptBehaviour, User};
//!
//! let question = client.question_with_text(
//!     client.direct_channel(&User::new("alice")),
//!     User::new("alice"),
//!     "Deploy now?",
//!     [":+1:", ":-1:"],
//! )?;
//! if question.ask().await {
//!     if let Some(answer) = question.get_response(PromptBehaviour::Delete).await {
//!         println!("{} picked {}", answer.from, answer.text);
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::oneshot;

use crate::chat::{CachedEntry, Channel, Message, MessageId, Reaction, User};
use crate::client::KeybaseClient;
use crate::listen::ConversationObserver;
use crate::{Error, Result};

/// Prompt posted when a question carries no text of its own.
pub const DEFAULT_PROMPT: &str = ":speech_balloon:";

/// What to do with the prompt once the question is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptBehaviour {
    /// Delete the prompt and, after a valid answer, post its text again
    /// without the option reactions.
    #[default]
    Replace,
    /// Delete the prompt.
    Delete,
    /// Leave the prompt as it is.
    Leave,
}

/// Where a question is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionState {
    Idle,
    Asking,
    AwaitingAnswer,
    Resolved,
    Cancelled,
}

impl QuestionState {
    fn is_over(self) -> bool {
        matches!(self, QuestionState::Resolved | QuestionState::Cancelled)
    }
}

/// The option a user picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    /// Who reacted.
    pub from: User,
    /// The configured option that matched their reaction.
    pub text: String,
}

struct Flow {
    state: QuestionState,
    source: Option<MessageId>,
    registered: bool,
    adopt_tx: Option<oneshot::Sender<Option<MessageId>>>,
    answer_tx: Option<oneshot::Sender<Option<Answer>>>,
    answer_rx: Option<oneshot::Receiver<Option<Answer>>>,
}

struct QuestionInner {
    this: Weak<QuestionInner>,
    client: KeybaseClient,
    channel: Channel,
    target: User,
    options: Vec<String>,
    text: Option<String>,
    flow: Mutex<Flow>,
}

/// A prompt waiting for one user to react with one of a fixed set of
/// options.
///
/// Dropping a question unregisters it; pending waiters resolve to `None`.
pub struct Question {
    inner: Arc<QuestionInner>,
}

impl Question {
    /// A question posting the default prompt.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `options` is empty.
    pub fn new<I, S>(client: &KeybaseClient, channel: Channel, target: User, options: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(client, channel, target, None, None, options)
    }

    /// A question posting `text` as its prompt.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `options` is empty.
    pub fn with_text<I, S>(
        client: &KeybaseClient,
        channel: Channel,
        target: User,
        text: impl Into<String>,
        options: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(client, channel, target, Some(text.into()), None, options)
    }

    /// A question adopting an already posted message as its prompt.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `options` is empty or the message is
    /// not in the cache.
    pub fn with_message<I, S>(
        client: &KeybaseClient,
        message: &MessageId,
        target: User,
        options: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = client
            .read_from_cache(message)
            .ok_or_else(|| Error::InvalidArgument(format!("message {message} is not cached")))?;
        Self::build(
            client,
            entry.channel.clone(),
            target,
            Some(entry.body.clone()),
            Some(entry.id.clone()),
            options,
        )
    }

    fn build<I, S>(
        client: &KeybaseClient,
        channel: Channel,
        target: User,
        text: Option<String>,
        source: Option<MessageId>,
        options: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options: Vec<String> = options.into_iter().map(Into::into).collect();
        if options.is_empty() {
            return Err(Error::InvalidArgument("a question needs at least one option".into()));
        }
        if !channel.is_valid() {
            return Err(Error::InvalidArgument("a question needs a channel".into()));
        }

        let inner = Arc::new_cyclic(|this| QuestionInner {
            this: this.clone(),
            client: client.clone(),
            channel,
            target,
            options,
            text,
            flow: Mutex::new(Flow {
                state: QuestionState::Idle,
                source,
                registered: false,
                adopt_tx: None,
                answer_tx: None,
                answer_rx: None,
            }),
        });
        Ok(Self { inner })
    }

    /// The conversation the question is asked in.
    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    /// The only user whose reaction counts.
    pub fn target(&self) -> &User {
        &self.inner.target
    }

    /// The configured options, in order.
    pub fn options(&self) -> &[String] {
        &self.inner.options
    }

    /// The prompt text as posted.
    pub fn prompt(&self) -> &str {
        self.inner.prompt()
    }

    /// The prompt message, once posted or adopted.
    pub fn source(&self) -> Option<MessageId> {
        self.inner.lock().source.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> QuestionState {
        self.inner.lock().state
    }

    /// Post the prompt if needed, wait for it to come back through the
    /// listener, then attach every option as a reaction.
    ///
    /// Returns `true` only if every option was attached. A question can be
    /// asked once.
    pub async fn ask(&self) -> bool {
        let inner = &self.inner;
        let (adopt_rx, existing) = {
            let mut flow = inner.lock();
            if flow.state != QuestionState::Idle {
                tracing::warn!(state = ?flow.state, "question already asked");
                return false;
            }
            flow.state = QuestionState::Asking;

            let (answer_tx, answer_rx) = oneshot::channel();
            flow.answer_tx = Some(answer_tx);
            flow.answer_rx = Some(answer_rx);

            match flow.source.clone() {
                Some(id) => {
                    flow.state = QuestionState::AwaitingAnswer;
                    (None, Some(id))
                }
                None => {
                    let (adopt_tx, adopt_rx) = oneshot::channel();
                    flow.adopt_tx = Some(adopt_tx);
                    (Some(adopt_rx), None)
                }
            }
        };
        inner.register();

        let registry = inner.client.registry();
        if !registry.wait_ready(inner.client.config().request_timeout()).await {
            tracing::error!(channel = %inner.channel, "listener not ready, question not asked");
            inner.cancel();
            return false;
        }

        let source = match (existing, adopt_rx) {
            (Some(id), _) => id,
            (None, Some(adopt_rx)) => {
                if !inner.client.send_message(&inner.channel, inner.prompt()).await {
                    tracing::error!(channel = %inner.channel, "failed to post question prompt");
                    inner.cancel();
                    return false;
                }
                match adopt_rx.await {
                    Ok(Some(id)) => id,
                    _ => {
                        tracing::debug!("question cancelled before its prompt arrived");
                        return false;
                    }
                }
            }
            (None, None) => return false,
        };

        let ok = inner
            .client
            .all_succeed(
                inner
                    .options
                    .iter()
                    .map(|option| inner.client.react_in(&inner.channel, &source, option))
                    .collect::<Vec<_>>(),
            )
            .await;
        if !ok {
            tracing::error!(%source, "failed to attach question options");
        }
        ok
    }

    /// Wait for the answer, then clean up the prompt per `behaviour`.
    ///
    /// Returns `None` if the question was cancelled, never asked, or its
    /// answer was already taken.
    pub async fn get_response(&self, behaviour: PromptBehaviour) -> Option<Answer> {
        let inner = &self.inner;
        let answer_rx = inner.lock().answer_rx.take()?;
        let answer = answer_rx.await.ok().flatten();
        inner.unregister();

        if behaviour == PromptBehaviour::Leave {
            return answer;
        }

        let Some(source) = inner.lock().source.clone() else {
            return answer;
        };
        if !inner.client.delete_in(&inner.channel, &source).await {
            tracing::error!(%source, "failed to delete question prompt");
        }
        if behaviour == PromptBehaviour::Replace && answer.is_some() {
            if let Some(text) = &inner.text {
                if !inner.client.send_message(&inner.channel, text).await {
                    tracing::error!(channel = %inner.channel, "failed to re-post question prompt");
                }
            }
        }
        answer
    }

    /// Resolve every pending wait with no answer and stop listening.
    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

impl Drop for Question {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl std::fmt::Debug for Question {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Question")
            .field("channel", &self.inner.channel)
            .field("target", &self.inner.target)
            .field("options", &self.inner.options)
            .field("state", &self.state())
            .finish()
    }
}

impl QuestionInner {
    fn prompt(&self) -> &str {
        self.text.as_deref().unwrap_or(DEFAULT_PROMPT)
    }

    fn lock(&self) -> MutexGuard<'_, Flow> {
        self.flow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn as_observer(&self) -> Option<Arc<dyn ConversationObserver>> {
        self.this
            .upgrade()
            .map(|inner| inner as Arc<dyn ConversationObserver>)
    }

    fn register(&self) {
        let Some(observer) = self.as_observer() else {
            return;
        };
        {
            let mut flow = self.lock();
            if flow.registered {
                return;
            }
            flow.registered = true;
        }
        self.client.add_listener(&self.channel, &observer);
    }

    fn unregister(&self) {
        {
            let mut flow = self.lock();
            if !flow.registered {
                return;
            }
            flow.registered = false;
        }
        if let Some(observer) = self.as_observer() {
            self.client.remove_listener(&self.channel, &observer);
        }
    }

    fn cancel(&self) {
        {
            let mut flow = self.lock();
            if flow.state.is_over() {
                return;
            }
            flow.state = QuestionState::Cancelled;
            if let Some(tx) = flow.adopt_tx.take() {
                let _ = tx.send(None);
            }
            if let Some(tx) = flow.answer_tx.take() {
                let _ = tx.send(None);
            }
        }
        self.unregister();
    }

    fn matching_option(&self, body: &str) -> Option<&String> {
        let body = body.to_lowercase();
        self.options.iter().find(|option| option.to_lowercase() == body)
    }
}

impl ConversationObserver for QuestionInner {
    fn on_message(&self, _message: &Message, entry: &CachedEntry) {
        let mut flow = self.lock();
        if flow.state != QuestionState::Asking || flow.adopt_tx.is_none() {
            return;
        }
        if entry.sender != *self.client.user() || entry.body != self.prompt() {
            return;
        }

        tracing::debug!(id = %entry.id, "question prompt adopted");
        flow.source = Some(entry.id.clone());
        flow.state = QuestionState::AwaitingAnswer;
        if let Some(tx) = flow.adopt_tx.take() {
            let _ = tx.send(Some(entry.id.clone()));
        }
    }

    fn on_reaction(&self, _reaction: &Reaction, entry: &CachedEntry) {
        {
            let mut flow = self.lock();
            if flow.state != QuestionState::AwaitingAnswer {
                return;
            }
            let Some(source) = flow.source.as_ref() else {
                return;
            };
            if !entry.is_reaction_to(source) || entry.sender != self.target {
                return;
            }
            let Some(option) = self.matching_option(&entry.body) else {
                return;
            };

            let answer = Answer {
                from: entry.sender.clone(),
                text: option.clone(),
            };
            tracing::debug!(from = %answer.from, option = %answer.text, "question answered");
            flow.state = QuestionState::Resolved;
            if let Some(tx) = flow.answer_tx.take() {
                let _ = tx.send(Some(answer));
            }
        }
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, Environment};
    use crate::chat::ContentType;
    use std::time::Instant;

    fn client() -> KeybaseClient {
        let config = ClientConfig::builder()
            .api_args(["-c", "sleep 30"])
            .listen_args(["-c", "sleep 30"])
            .build()
            .unwrap();
        KeybaseClient::with_environment(config, Environment::new("/bin/sh", "me"))
    }

    fn entry(seq: u64, sender: &str, content_type: ContentType, body: &str, target: Option<u64>) -> CachedEntry {
        CachedEntry {
            id: MessageId::new("conv", seq),
            channel: Channel::new("alice,me"),
            sender: User::new(sender),
            content_type,
            body: body.into(),
            reaction_target: target.map(|t| MessageId::new("conv", t)),
            received_at: Instant::now(),
        }
    }

    fn question(client: &KeybaseClient) -> Question {
        Question::with_message(client, &MessageId::new("conv", 1), User::new("alice"), ["yes", "no"]).unwrap()
    }

    fn seed_prompt(client: &KeybaseClient) {
        client
            .cache()
            .insert_or_replace(entry(1, "me", ContentType::Text, "Ship it?", None));
    }

    #[tokio::test]
    async fn empty_options_are_rejected() {
        let client = client();
        let result = Question::new(&client, Channel::new("alice,me"), User::new("alice"), Vec::<String>::new());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn uncached_message_is_rejected() {
        let client = client();
        let result = Question::with_message(&client, &MessageId::new("conv", 9), User::new("alice"), ["yes"]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn default_prompt_is_used_without_text() {
        let client = client();
        let q = Question::new(&client, Channel::new("alice,me"), User::new("alice"), ["yes"]).unwrap();
        assert_eq!(q.prompt(), DEFAULT_PROMPT);
        assert_eq!(q.state(), QuestionState::Idle);
    }

    #[tokio::test]
    async fn adopted_message_supplies_prompt_and_channel() {
        let client = client();
        seed_prompt(&client);
        let q = question(&client);
        assert_eq!(q.prompt(), "Ship it?");
        assert_eq!(q.channel(), &Channel::new("alice,me"));
        assert_eq!(q.source(), Some(MessageId::new("conv", 1)));
    }

    #[tokio::test]
    async fn reaction_from_target_resolves_case_insensitively() {
        let client = client();
        seed_prompt(&client);
        let q = question(&client);
        {
            let mut flow = q.inner.lock();
            flow.state = QuestionState::AwaitingAnswer;
            let (tx, rx) = oneshot::channel();
            flow.answer_tx = Some(tx);
            flow.answer_rx = Some(rx);
        }

        let cache = Arc::clone(client.cache());
        let stranger = entry(2, "bob", ContentType::Reaction, "no", Some(1));
        q.inner.on_reaction(&Reaction::new(stranger.id.clone(), Arc::clone(&cache)), &stranger);
        let wrong_target = entry(3, "alice", ContentType::Reaction, "no", Some(7));
        q.inner.on_reaction(&Reaction::new(wrong_target.id.clone(), Arc::clone(&cache)), &wrong_target);
        let not_an_option = entry(4, "alice", ContentType::Reaction, "maybe", Some(1));
        q.inner.on_reaction(&Reaction::new(not_an_option.id.clone(), Arc::clone(&cache)), &not_an_option);
        assert_eq!(q.state(), QuestionState::AwaitingAnswer);

        let answer = entry(5, "Alice", ContentType::Reaction, "No", Some(1));
        q.inner.on_reaction(&Reaction::new(answer.id.clone(), cache), &answer);
        assert_eq!(q.state(), QuestionState::Resolved);

        let got = q.get_response(PromptBehaviour::Leave).await.unwrap();
        assert_eq!(got, Answer { from: User::new("alice"), text: "no".into() });
        assert!(q.get_response(PromptBehaviour::Leave).await.is_none());
    }

    #[tokio::test]
    async fn prompt_adoption_needs_exact_body_from_self() {
        let client = client();
        let q = Question::with_text(&client, Channel::new("alice,me"), User::new("alice"), "Ready?", ["y"]).unwrap();
        let (tx, mut rx) = oneshot::channel();
        {
            let mut flow = q.inner.lock();
            flow.state = QuestionState::Asking;
            flow.adopt_tx = Some(tx);
        }
        let cache = Arc::clone(client.cache());

        let other_sender = entry(1, "alice", ContentType::Text, "Ready?", None);
        q.inner.on_message(&Message::new(other_sender.id.clone(), Arc::clone(&cache)), &other_sender);
        let other_body = entry(2, "me", ContentType::Text, "ready?", None);
        q.inner.on_message(&Message::new(other_body.id.clone(), Arc::clone(&cache)), &other_body);
        assert!(rx.try_recv().is_err());

        let prompt = entry(3, "me", ContentType::Text, "Ready?", None);
        q.inner.on_message(&Message::new(prompt.id.clone(), cache), &prompt);
        assert_eq!(rx.try_recv().unwrap(), Some(MessageId::new("conv", 3)));
        assert_eq!(q.state(), QuestionState::AwaitingAnswer);
    }

    #[tokio::test]
    async fn cancel_resolves_pending_answer_with_none() {
        let client = client();
        seed_prompt(&client);
        let q = Arc::new(question(&client));
        {
            let mut flow = q.inner.lock();
            flow.state = QuestionState::AwaitingAnswer;
            let (tx, rx) = oneshot::channel();
            flow.answer_tx = Some(tx);
            flow.answer_rx = Some(rx);
        }

        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get_response(PromptBehaviour::Leave).await })
        };
        tokio::task::yield_now().await;
        q.cancel();
        assert!(waiter.await.unwrap().is_none());
        assert_eq!(q.state(), QuestionState::Cancelled);
    }

    #[tokio::test]
    async fn ask_twice_fails() {
        let client = client();
        let q = Question::new(&client, Channel::new("alice,me"), User::new("alice"), ["y"]).unwrap();
        q.cancel();
        assert!(!q.ask().await);
    }

    #[tokio::test]
    async fn ask_gives_up_when_listener_never_starts() {
        let config = ClientConfig::builder()
            .api_args(["-c", "sleep 30"])
            .listen_args(["-c", "sleep 30"])
            .request_timeout(std::time::Duration::from_millis(200))
            .build()
            .unwrap();
        let client = KeybaseClient::with_environment(config, Environment::new("/bin/sh", "me"));
        let q = Question::new(&client, Channel::new("alice,me"), User::new("alice"), ["y"]).unwrap();

        assert!(!q.ask().await);
        assert_eq!(q.state(), QuestionState::Cancelled);
        assert_eq!(client.registry().observer_count(), 0);
        assert!(q.get_response(PromptBehaviour::Leave).await.is_none());
    }

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Question>();
        assert_send_sync::<Answer>();
        assert_send_sync::<PromptBehaviour>();
    }
}
