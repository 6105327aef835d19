//! I/O primitives for communicating with keybase subprocesses.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::time::timeout as tokio_timeout;

use crate::{Error, Result};

/// Reads newline-delimited output from a subprocess stream.
///
/// Works for both stdout (JSON lines) and stderr (status and error text).
/// Lines are trimmed and blank lines are skipped.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buffer: String,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Create a new reader over a child process stream.
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buffer: String::with_capacity(4096),
        }
    }

    /// Read the next non-empty line.
    ///
    /// Returns `Ok(None)` when EOF is reached.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            self.buffer.clear();

            let bytes_read = self
                .reader
                .read_line(&mut self.buffer)
                .await
                .map_err(Error::io)?;

            if bytes_read == 0 {
                return Ok(None);
            }

            let line = self.buffer.trim();
            if line.is_empty() {
                continue;
            }

            return Ok(Some(line.to_string()));
        }
    }
}

/// Writes request lines to a subprocess stdin.
pub struct ProcessWriter {
    stdin: ChildStdin,
}

impl ProcessWriter {
    /// Create a new writer from a child process stdin.
    pub fn new(stdin: ChildStdin) -> Self {
        Self { stdin }
    }

    /// Write one line and flush it through to the process.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(Error::io)?;
        self.stdin.write_all(b"\n").await.map_err(Error::io)?;
        self.flush().await
    }

    /// Push out anything still buffered.
    pub async fn flush(&mut self) -> Result<()> {
        self.stdin.flush().await.map_err(Error::io)
    }

    /// Close stdin, signalling end of input.
    pub async fn close(mut self) -> Result<()> {
        self.stdin.shutdown().await.map_err(Error::io)
    }
}

/// Run `future`, failing with [`Error::Timeout`] if it takes longer than
/// `duration`.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio_timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(duration)),
    }
}
