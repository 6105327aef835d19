//! The single long-lived `keybase chat api-listen` subprocess.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::cache::{IdBatchPool, MessageCache};
use crate::chat::{ContentType, Message, MessageId, Reaction};
use crate::process::ProcessSpec;
use crate::protocol::IncomingEvent;

/// Error-stream line the listener prints once it is ready.
pub const LISTEN_START_LINE: &str = "Listening for chat notifications";

/// What the listener does with the targets of a delete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Drop the targets from the cache.
    #[default]
    Remove,
    /// Report each target to the observer and leave the cache alone.
    Callback,
    /// Report each target, then drop it from the cache.
    CallbackAndRemove,
}

impl DeletePolicy {
    fn notifies(self) -> bool {
        matches!(self, DeletePolicy::Callback | DeletePolicy::CallbackAndRemove)
    }

    fn removes(self) -> bool {
        matches!(self, DeletePolicy::Remove | DeletePolicy::CallbackAndRemove)
    }
}

/// Receives decoded events from an [`EventListener`].
///
/// # Implementation Notes
///
/// - Methods have default empty implementations for selective observation.
/// - Observers are called on the listener's reader task, in arrival order;
///   slow observers delay every later event.
/// - `on_ready` fires once the process reports that it is subscribed. Events
///   sent before then are not seen.
/// - `on_error` fires when the listener process cannot start or exits. The
///   listener does not restart itself.
pub trait ChatObserver: Send + Sync {
    /// How delete events should be handled.
    fn delete_policy(&self) -> DeletePolicy {
        DeletePolicy::Remove
    }

    /// A text message was received and cached.
    fn on_incoming(&self, message: Message) {
        let _ = message;
    }

    /// A reaction was received and cached.
    fn on_reaction(&self, reaction: Reaction) {
        let _ = reaction;
    }

    /// A message was deleted.
    fn on_delete(&self, target: &MessageId) {
        let _ = target;
    }

    /// The listener is subscribed and receiving events.
    fn on_ready(&self) {}

    /// The listener stopped.
    fn on_error(&self) {}
}

/// Spawns the listen process and routes its events into the cache and an
/// observer.
#[derive(Debug, Clone)]
pub struct EventListener {
    spec: ProcessSpec,
    cache: Arc<MessageCache>,
    batches: Arc<IdBatchPool>,
}

/// A running listener. Dropping it stops the process without calling
/// [`ChatObserver::on_error`].
#[derive(Debug)]
pub struct ListenHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl ListenHandle {
    /// Check whether the listen process has finished.
    pub fn is_finished(&self) -> bool {
        self.tasks.first().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ListenHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl EventListener {
    /// Create a listener running `spec`, caching into `cache`.
    pub fn new(spec: ProcessSpec, cache: Arc<MessageCache>, batches: Arc<IdBatchPool>) -> Self {
        Self {
            spec,
            cache,
            batches,
        }
    }

    /// The cache events are recorded in.
    pub fn cache(&self) -> &Arc<MessageCache> {
        &self.cache
    }

    /// Start the listen process and deliver its events to `observer`.
    ///
    /// Returns `None` after calling `observer.on_error()` if the process
    /// cannot be started.
    pub fn listen(&self, observer: Arc<dyn ChatObserver>) -> Option<ListenHandle> {
        let mut process = match self.spec.spawn() {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(error = %e, "listener process failed to start");
                observer.on_error();
                return None;
            }
        };

        let mut tasks = Vec::with_capacity(2);
        let stderr = process.take_stderr_reader();

        if let Some(mut stdout) = process.take_reader() {
            let listener = self.clone();
            let observer = Arc::clone(&observer);
            tasks.push(tokio::spawn(async move {
                loop {
                    match stdout.next_line().await {
                        Ok(Some(line)) => listener.dispatch_line(&line, observer.as_ref()),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::error!(error = %e, "listener read failed");
                            break;
                        }
                    }
                }
                tracing::debug!("listener process exited");
                drop(process);
                observer.on_error();
            }));
        }

        if let Some(mut stderr) = stderr {
            tasks.push(tokio::spawn(async move {
                let mut started = false;
                while let Ok(Some(line)) = stderr.next_line().await {
                    if !started && line.starts_with(LISTEN_START_LINE) {
                        started = true;
                        tracing::debug!("listener started");
                        observer.on_ready();
                        continue;
                    }
                    tracing::error!(%line, "listener error output");
                }
            }));
        }

        Some(ListenHandle { tasks })
    }

    /// Decode one event line and act on it.
    ///
    /// Text and reaction events are stamped, cached and then reported.
    /// Delete events are handled per the observer's [`DeletePolicy`]. Other
    /// content is logged and dropped.
    pub fn dispatch_line(&self, line: &str, observer: &dyn ChatObserver) {
        tracing::debug!(line, "incoming");

        let event = match IncomingEvent::parse(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "undecodable listener line");
                return;
            }
        };

        match event.content_type() {
            ContentType::Text => {
                if let Some(id) = self.record(&event) {
                    observer.on_incoming(Message::new(id, Arc::clone(&self.cache)));
                }
            }
            ContentType::Reaction => {
                if let Some(id) = self.record(&event) {
                    observer.on_reaction(Reaction::new(id, Arc::clone(&self.cache)));
                }
            }
            ContentType::Delete => self.delete(&event, observer),
            ContentType::Unknown => {
                tracing::error!(line, "unknown content type");
            }
            other => {
                tracing::warn!(content_type = %other, "unhandled content type");
            }
        }
    }

    fn record(&self, event: &IncomingEvent) -> Option<MessageId> {
        let Some(entry) = event.to_entry(Instant::now()) else {
            tracing::error!("event carried no valid message");
            return None;
        };
        let id = entry.id.clone();
        if self.cache.insert_or_replace(entry) {
            Some(id)
        } else {
            tracing::error!(%id, "failed to cache incoming event");
            None
        }
    }

    fn delete(&self, event: &IncomingEvent, observer: &dyn ChatObserver) {
        let mut targets = self.batches.acquire();
        if !event.delete_targets(&mut targets) {
            tracing::error!("delete event without a target list");
            return;
        }

        let policy = observer.delete_policy();
        tracing::debug!(count = targets.len(), ?policy, "handling delete");

        if policy.notifies() {
            for target in targets.iter() {
                observer.on_delete(target);
            }
        }
        if policy.removes() {
            for target in targets.iter() {
                self.cache.take(target);
            }
        }
    }
}
