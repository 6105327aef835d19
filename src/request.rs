//! One-request-one-reply exchanges over pooled workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::process::{ExitReason, WorkerEvent, WorkerPool};
use crate::protocol::{classify_line, expect_result, ApiRequest, Outcome};
use crate::{Error, Result};

/// Sends request lines through the [`WorkerPool`] and waits for the reply.
///
/// Each request leases a worker, arms its timeout, writes one line and waits
/// for exactly one classified reply. The lease is returned on every path.
#[derive(Debug, Clone)]
pub struct RequestChannel {
    pool: Arc<WorkerPool>,
    timeout: Duration,
}

impl RequestChannel {
    /// Create a channel over `pool` with a per-request `timeout`.
    pub fn new(pool: Arc<WorkerPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// The worker pool backing this channel.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one raw request line and return the reply's result string.
    ///
    /// Replies with neither a result nor an error are logged and skipped; the
    /// timeout still bounds the wait.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolExhausted`] if every worker is busy
    /// - [`Error::CliError`] for an explicit error reply
    /// - [`Error::Timeout`] or [`Error::UnexpectedExit`] if no reply arrives
    pub async fn request(&self, line: &str) -> Result<String> {
        let mut lease = self.pool.acquire()?;
        let mut events = match lease.initialize(self.timeout).await {
            Ok(events) => events,
            Err(e) => {
                lease.abandon();
                return Err(e);
            }
        };

        if let Err(e) = lease.write_line(line).await {
            lease.abandon();
            return Err(e);
        }
        tracing::debug!(worker = lease.id(), request = line, "request sent");

        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Line(reply) => match classify_line(&reply) {
                    Outcome::Result(result) => {
                        if lease.complete() {
                            tracing::debug!(worker = lease.id(), %result, "request completed");
                            return Ok(result);
                        }
                    }
                    Outcome::Error(message) => {
                        if lease.complete() {
                            tracing::error!(worker = lease.id(), %message, "keybase returned an error");
                            return Err(Error::CliError { message });
                        }
                    }
                    Outcome::Invalid => {
                        tracing::error!(worker = lease.id(), reply = %reply, "invalid response");
                    }
                },
                WorkerEvent::ErrorLine(text) => {
                    tracing::error!(worker = lease.id(), %text, "keybase error output");
                }
                WorkerEvent::Exited(ExitReason::Timeout) => {
                    return Err(Error::Timeout(self.timeout));
                }
                WorkerEvent::Exited(ExitReason::Exit) => {
                    lease.abandon();
                    return Err(Error::UnexpectedExit);
                }
            }
        }

        lease.abandon();
        Err(Error::UnexpectedExit)
    }

    /// Send a typed request and check its reply against the literal its
    /// method expects.
    ///
    /// # Errors
    ///
    /// Any error of [`request`](Self::request), or
    /// [`Error::UnexpectedResult`] when the reply is not the expected literal.
    pub async fn execute(&self, request: &ApiRequest) -> Result<()> {
        let line = request.to_line()?;
        let result = self.request(&line).await?;
        expect_result(&result, request.method().expected_result())
    }

    /// [`execute`](Self::execute) with every failure logged and reported as
    /// `false`.
    pub async fn call(&self, request: &ApiRequest) -> bool {
        match self.execute(request).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, method = ?request.method(), "request failed");
                false
            }
        }
    }

    /// Callback form of [`request`](Self::request), run on a spawned task.
    ///
    /// Exactly one of `on_result` or `on_error` is invoked.
    pub fn send<R, E>(&self, line: impl Into<String>, on_result: R, on_error: E) -> JoinHandle<()>
    where
        R: FnOnce(String) + Send + 'static,
        E: FnOnce(Error) + Send + 'static,
    {
        let channel = self.clone();
        let line = line.into();
        tokio::spawn(async move {
            match channel.request(&line).await {
                Ok(result) => on_result(result),
                Err(e) => on_error(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Channel;
    use crate::process::ProcessSpec;

    fn channel(script: &str, size: usize, timeout: Duration) -> RequestChannel {
        let pool = Arc::new(WorkerPool::new(ProcessSpec::new("/bin/sh", ["-c", script]), size));
        RequestChannel::new(pool, timeout)
    }

    const ACK: &str = r#"while read line; do echo '{"result":{"message":"message sent","id":1}}'; done"#;

    #[tokio::test]
    async fn request_returns_result() {
        let channel = channel(ACK, 1, Duration::from_secs(5));
        assert_eq!(channel.request("{}").await.unwrap(), "message sent");
        // Same worker, reused process.
        assert_eq!(channel.request("{}").await.unwrap(), "message sent");
        assert_eq!(channel.pool().available(), 1);
    }

    #[tokio::test]
    async fn call_validates_expected_literal() {
        let channel = channel(ACK, 1, Duration::from_secs(5));
        let target = Channel::new("general");
        assert!(channel.call(&ApiRequest::send(&target, "hi")).await);
        assert!(!channel.call(&ApiRequest::delete(&target, 3)).await);
        match channel.execute(&ApiRequest::delete(&target, 3)).await {
            Err(Error::UnexpectedResult { expected, actual }) => {
                assert_eq!(expected, "message deleted");
                assert_eq!(actual, "message sent");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_reply_is_error() {
        let script = r#"while read line; do echo '{"error":{"code":1,"message":"no such channel"}}'; done"#;
        let channel = channel(script, 1, Duration::from_secs(5));
        match channel.request("{}").await {
            Err(Error::CliError { message }) => assert_eq!(message, "no such channel"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_reply_waits_for_timeout() {
        let script = r#"while read line; do echo '{"unrelated":true}'; done"#;
        let channel = channel(script, 1, Duration::from_millis(200));
        assert!(matches!(channel.request("{}").await, Err(Error::Timeout(_))));
        assert_eq!(channel.pool().available(), 1);
    }

    #[tokio::test]
    async fn crash_is_unexpected_exit() {
        let channel = channel("read line; exit 1", 1, Duration::from_secs(5));
        assert!(matches!(
            channel.request("{}").await,
            Err(Error::UnexpectedExit)
        ));
        // The worker restarts on the next lease.
        assert!(matches!(
            channel.request("{}").await,
            Err(Error::UnexpectedExit)
        ));
    }

    #[tokio::test]
    async fn exhausted_pool_fails_immediately() {
        let channel = channel(ACK, 1, Duration::from_secs(5));
        let _held = channel.pool().acquire().unwrap();
        assert!(matches!(
            channel.request("{}").await,
            Err(Error::PoolExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn send_invokes_exactly_one_callback() {
        let channel = channel(ACK, 1, Duration::from_secs(5));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let err_tx = tx.clone();
        channel
            .send("{}", move |r| drop(tx.send(Ok(r))), move |e| drop(err_tx.send(Err(e))))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().unwrap(), "message sent");
        assert!(rx.recv().await.is_none());
    }
}
