//! Process management for the keybase CLI.
//!
//! Two kinds of subprocess are run:
//!
//! - pooled `keybase chat api` workers, each answering one request line at a
//!   time and reused across requests
//! - a single long-lived `keybase chat api-listen` process, owned by the
//!   [`EventListener`](crate::listen::EventListener)
//!
//! # Architecture
//!
//! ```text
//! libkeybase                                   keybase CLI
//! ┌────────────┐  lease  ┌────────────┐        ┌──────────────┐
//! │ Request    │────────▶│ WorkerPool │──stdin▶│ chat api  x N│
//! │ Channel    │◀─events─│  Worker    │◀stdout─│              │
//! └────────────┘         └────────────┘        └──────────────┘
//!                        ┌────────────┐        ┌──────────────┐
//!                        │ Event      │◀stdout─│ chat         │
//!                        │ Listener   │◀stderr─│ api-listen   │
//!                        └────────────┘        └──────────────┘
//! ```
//!
//! # Protocol
//!
//! One JSON object per line in both directions. A worker that exits or is
//! killed by its timer before answering reports
//! [`WorkerEvent::Exited`] instead of a line.

mod io;
mod pool;
mod spawn;
mod worker;

pub use io::{with_timeout, LineReader, ProcessWriter};
pub use pool::{WorkerLease, WorkerPool};
pub use spawn::{KeybaseProcess, ProcessSpec};
pub use worker::{Completion, ExitReason, Worker, WorkerEvent, WorkerState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KeybaseProcess>();
        assert_send_sync::<WorkerPool>();
        assert_send_sync::<WorkerLease>();
    }
}
