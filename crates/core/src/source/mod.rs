//! Record sources
//!
//! A [`RecordSource`] is the pull side of anything that can hand the
//! pipeline a sequence of records of one representation: a live queue fed
//! by a transport task, a framed capture file, or an in-memory vector for
//! deterministic replay.
//!
//! Polling returns a tagged [`SourcePoll`] instead of an error for the two
//! expected non-record cases: `Empty` means nothing arrived within the
//! source's patience (try again next cycle), `EndOfInput` means the source
//! is exhausted for good. Genuine faults - a disconnected producer, an
//! unreadable file - come back as `Err`.

mod file;
mod memory;
mod queue;

pub use file::{FileSource, FramedWriter};
pub use memory::MemorySource;
pub use queue::{record_queue, QueueSource, RecordQueue};

use async_trait::async_trait;

use crate::error::Result;

/// Result of a single pull from a [`RecordSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePoll<T> {
    /// A record arrived.
    Record(T),
    /// Nothing available within the timeout; try again.
    Empty,
    /// The source is permanently exhausted.
    EndOfInput,
}

impl<T> SourcePoll<T> {
    /// The record, if this poll produced one.
    pub fn record(self) -> Option<T> {
        match self {
            SourcePoll::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// Pull-style access to a sequence of records.
#[async_trait]
pub trait RecordSource<T>: Send {
    /// Identity of this source for logs and error context.
    fn describe(&self) -> &str;

    /// Best-effort, non-blocking check for an available record.
    fn has_next(&self) -> bool;

    /// Pull the next record, waiting up to the source's own bound.
    async fn next(&mut self) -> Result<SourcePoll<T>>;
}
