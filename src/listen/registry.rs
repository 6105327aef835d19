//! Fan-out of one listener to many per-conversation observers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;

use super::listener::{ChatObserver, EventListener, ListenHandle};
use crate::chat::{CachedEntry, Message, Reaction};

/// Receives the events of one conversation from a [`ListenerRegistry`].
///
/// The registry only holds observers weakly; keep the `Arc` alive for as long
/// as events should arrive.
pub trait ConversationObserver: Send + Sync {
    /// A text message arrived in the conversation.
    fn on_message(&self, message: &Message, entry: &CachedEntry) {
        let _ = (message, entry);
    }

    /// A reaction arrived in the conversation.
    fn on_reaction(&self, reaction: &Reaction, entry: &CachedEntry) {
        let _ = (reaction, entry);
    }
}

#[derive(Default)]
struct RegistryState {
    observers: HashMap<String, Vec<Weak<dyn ConversationObserver>>>,
    listening: bool,
    handle: Option<ListenHandle>,
}

/// Shares one [`EventListener`] process between any number of conversation
/// observers, keyed by channel name (case-insensitive).
///
/// The listener is started when the first observer is added and stopped when
/// the last one is removed. If it fails while observers remain, it is
/// restarted right away.
pub struct ListenerRegistry {
    this: Weak<ListenerRegistry>,
    listener: EventListener,
    state: Mutex<RegistryState>,
    ready: watch::Sender<bool>,
}

/// Forwards listener callbacks without keeping the registry alive.
struct Forward(Weak<ListenerRegistry>);

impl ChatObserver for Forward {
    fn on_incoming(&self, message: Message) {
        if let Some(registry) = self.0.upgrade() {
            registry.fan_out_message(&message);
        }
    }

    fn on_reaction(&self, reaction: Reaction) {
        if let Some(registry) = self.0.upgrade() {
            registry.fan_out_reaction(&reaction);
        }
    }

    fn on_ready(&self) {
        if let Some(registry) = self.0.upgrade() {
            registry.ready.send_replace(true);
        }
    }

    fn on_error(&self) {
        if let Some(registry) = self.0.upgrade() {
            registry.listener_failed();
        }
    }
}

/// Same folding as [`Channel`](crate::chat::Channel) equality.
fn key(channel_name: &str) -> String {
    channel_name.to_ascii_lowercase()
}

impl ListenerRegistry {
    /// Create a registry over `listener`. Nothing is started until an
    /// observer is added.
    pub fn new(listener: EventListener) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            listener,
            state: Mutex::new(RegistryState::default()),
            ready: watch::channel(false).0,
        })
    }

    /// Register `observer` for the conversation named `channel_name`.
    pub fn add_listener(&self, channel_name: &str, observer: &Arc<dyn ConversationObserver>) {
        self.lock()
            .observers
            .entry(key(channel_name))
            .or_default()
            .push(Arc::downgrade(observer));
        self.start();
    }

    /// Unregister `observer`. Stops listening once no observers remain.
    pub fn remove_listener(&self, channel_name: &str, observer: &Arc<dyn ConversationObserver>) {
        let target = Arc::downgrade(observer);
        let handle = {
            let mut state = self.lock();
            let key = key(channel_name);
            if let Some(list) = state.observers.get_mut(&key) {
                list.retain(|w| !Weak::ptr_eq(w, &target) && w.strong_count() > 0);
                if list.is_empty() {
                    state.observers.remove(&key);
                }
            }
            if state.observers.is_empty() {
                state.listening = false;
                self.ready.send_replace(false);
                state.handle.take()
            } else {
                None
            }
        };
        if handle.is_some() {
            tracing::debug!("last observer removed, stopping listener");
        }
        drop(handle);
    }

    /// Number of live observers across all conversations.
    pub fn observer_count(&self) -> usize {
        self.lock()
            .observers
            .values()
            .flatten()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Check whether the listener is currently meant to be running.
    pub fn is_listening(&self) -> bool {
        self.lock().listening
    }

    /// Check whether the running listener has reported that it receives
    /// events.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait up to `timeout` for the listener to receive events.
    ///
    /// Returns `false` if it is not ready in time.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.subscribe();
        let result = matches!(
            tokio::time::timeout(timeout, ready.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        result
    }

    fn start(&self) {
        {
            let mut state = self.lock();
            if state.listening || state.observers.is_empty() {
                return;
            }
            state.listening = true;
        }

        tracing::debug!("starting shared listener");
        let handle = self.listener.listen(Arc::new(Forward(self.this.clone())));

        let mut state = self.lock();
        if let Some(handle) = handle {
            if state.listening {
                state.handle = Some(handle);
            }
        }
    }

    fn listener_failed(&self) {
        self.ready.send_replace(false);
        let retry = {
            let mut state = self.lock();
            state.listening = false;
            state.handle = None;
            state.observers.retain(|_, list| {
                list.retain(|w| w.strong_count() > 0);
                !list.is_empty()
            });
            !state.observers.is_empty()
        };
        if !retry {
            return;
        }

        tracing::warn!("listener stopped, restarting");
        let Some(registry) = self.this.upgrade() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { registry.start() });
            }
            Err(_) => tracing::error!("no runtime available to restart listener"),
        }
    }

    /// Live observers for `channel_name`, pruning expired ones.
    fn observers_for(&self, channel_name: &str) -> Vec<Arc<dyn ConversationObserver>> {
        let mut state = self.lock();
        let key = key(channel_name);
        let Some(list) = state.observers.get_mut(&key) else {
            return Vec::new();
        };

        let mut live = Vec::with_capacity(list.len());
        list.retain(|w| match w.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        if list.is_empty() {
            state.observers.remove(&key);
        }
        live
    }

    fn fan_out_message(&self, message: &Message) {
        let Some(entry) = message.read() else {
            return;
        };
        for observer in self.observers_for(entry.channel.name()) {
            observer.on_message(message, &entry);
        }
    }

    fn fan_out_reaction(&self, reaction: &Reaction) {
        let Some(entry) = reaction.read() else {
            return;
        };
        for observer in self.observers_for(entry.channel.name()) {
            observer.on_reaction(reaction, &entry);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("observers", &self.observer_count())
            .field("listening", &self.is_listening())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{IdBatchPool, MessageCache};
    use crate::process::ProcessSpec;
    use std::time::Duration;

    #[derive(Default)]
    struct Bodies(Mutex<Vec<String>>);

    impl ConversationObserver for Bodies {
        fn on_message(&self, _message: &Message, entry: &CachedEntry) {
            self.0.lock().unwrap().push(entry.body.clone());
        }
    }

    fn text(channel: &str, seq: u64, body: &str) -> String {
        format!(
            r#"{{"msg":{{"id":{seq},"conversation_id":"{channel}","channel":{{"name":"{channel}"}},"sender":{{"username":"alice"}},"content":{{"type":"text","text":{{"body":"{body}"}}}}}}}}"#
        )
    }

    fn registry(script: &str) -> Arc<ListenerRegistry> {
        ListenerRegistry::new(EventListener::new(
            ProcessSpec::new("/bin/sh", ["-c", script]),
            Arc::new(MessageCache::new(64, 32)),
            Arc::new(IdBatchPool::new(4)),
        ))
    }

    #[tokio::test]
    async fn fans_out_by_channel_name() {
        let registry = registry("sleep 30");
        let general = Arc::new(Bodies::default());
        let random = Arc::new(Bodies::default());
        let general_dyn: Arc<dyn ConversationObserver> = general.clone();
        let random_dyn: Arc<dyn ConversationObserver> = random.clone();
        registry.add_listener("General", &general_dyn);
        registry.add_listener("random", &random_dyn);
        assert!(registry.is_listening());

        let forward = Forward(Arc::downgrade(&registry));
        registry.listener.dispatch_line(&text("general", 1, "hello"), &forward);

        assert_eq!(*general.0.lock().unwrap(), vec!["hello"]);
        assert!(random.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_observers_are_pruned() {
        let registry = registry("sleep 30");
        let observer: Arc<dyn ConversationObserver> = Arc::new(Bodies::default());
        registry.add_listener("general", &observer);
        assert_eq!(registry.observer_count(), 1);
        drop(observer);

        let forward = Forward(Arc::downgrade(&registry));
        registry.listener.dispatch_line(&text("general", 1, "anyone?"), &forward);
        assert_eq!(registry.observer_count(), 0);
    }

    #[tokio::test]
    async fn stops_when_last_observer_leaves() {
        let registry = registry("sleep 30");
        let a: Arc<dyn ConversationObserver> = Arc::new(Bodies::default());
        let b: Arc<dyn ConversationObserver> = Arc::new(Bodies::default());
        registry.add_listener("general", &a);
        registry.add_listener("random", &b);

        registry.remove_listener("general", &a);
        assert!(registry.is_listening());
        registry.remove_listener("RANDOM", &b);
        assert!(!registry.is_listening());
        assert_eq!(registry.observer_count(), 0);
    }

    #[tokio::test]
    async fn ready_after_start_line() {
        let registry = registry("sleep 0.2; echo 'Listening for chat notifications.' >&2; sleep 30");
        assert!(!registry.is_ready());
        let observer: Arc<dyn ConversationObserver> = Arc::new(Bodies::default());
        registry.add_listener("general", &observer);

        assert!(registry.wait_ready(Duration::from_secs(5)).await);
        assert!(registry.is_ready());

        registry.remove_listener("general", &observer);
        assert!(!registry.is_ready());
    }

    #[tokio::test]
    async fn wait_ready_times_out_without_start_line() {
        let registry = registry("sleep 30");
        let observer: Arc<dyn ConversationObserver> = Arc::new(Bodies::default());
        registry.add_listener("general", &observer);

        assert!(!registry.wait_ready(Duration::from_millis(200)).await);
        registry.remove_listener("general", &observer);
    }

    #[tokio::test]
    async fn failure_with_only_expired_observers_stays_stopped() {
        let registry = registry("sleep 30");
        let observer: Arc<dyn ConversationObserver> = Arc::new(Bodies::default());
        registry.add_listener("general", &observer);
        assert!(registry.is_listening());
        drop(observer);

        registry.listener_failed();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!registry.is_listening());
        assert_eq!(registry.observer_count(), 0);
        assert!(registry.lock().observers.is_empty());
    }

    #[tokio::test]
    async fn keys_fold_like_channel_equality() {
        use crate::chat::Channel;

        let registry = registry("sleep 30");
        let observer = Arc::new(Bodies::default());
        let observer_dyn: Arc<dyn ConversationObserver> = observer.clone();
        let forward = Forward(Arc::downgrade(&registry));

        for (registered, incoming) in [("General", "general"), ("\u{c4}rger", "\u{e4}rger")] {
            registry.add_listener(registered, &observer_dyn);
            registry.listener.dispatch_line(&text(incoming, 1, incoming), &forward);
            let delivered = observer.0.lock().unwrap().contains(&incoming.to_string());
            assert_eq!(
                delivered,
                Channel::new(registered) == Channel::new(incoming),
                "{registered} vs {incoming}"
            );
            registry.remove_listener(registered, &observer_dyn);
        }
    }

    #[tokio::test]
    async fn restarts_after_listener_exit() {
        let dir = std::env::temp_dir().join(format!("libkeybase-relisten-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let counter = dir.join("starts");
        let _ = std::fs::remove_file(&counter);

        // Exits immediately the first time, then stays up.
        let script = format!(
            "echo start >> {path}; if [ $(wc -l < {path}) -gt 1 ]; then sleep 30; fi",
            path = counter.display()
        );
        let registry = registry(&script);
        let observer: Arc<dyn ConversationObserver> = Arc::new(Bodies::default());
        registry.add_listener("general", &observer);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let starts = std::fs::read_to_string(&counter).unwrap_or_default();
                if starts.lines().count() >= 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        registry.remove_listener("general", &observer);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
