//! Live record queues
//!
//! The push side never blocks: data acquisition must not stall because the
//! pipeline is busy, so the channel is unbounded and backpressure lands on
//! the consumer. The pull side is a [`RecordSource`] whose `next` waits at
//! most the configured timeout before reporting `Empty`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time;

use crate::error::{Error, Result};
use crate::source::{RecordSource, SourcePoll};

/// Create a linked push handle / pull source pair.
///
/// `label` identifies the queue in logs and transport errors. `timeout`
/// bounds how long one pull waits before yielding `Empty`.
pub fn record_queue<T>(
    label: impl Into<String>,
    timeout: Duration,
) -> (RecordQueue<T>, QueueSource<T>) {
    let label: Arc<str> = Arc::from(label.into());
    let depth = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        RecordQueue {
            tx,
            depth: depth.clone(),
            label: label.clone(),
        },
        QueueSource {
            rx,
            depth,
            timeout,
            label,
        },
    )
}

/// Producer-side handle. Cloneable; the queue closes when every handle has
/// been dropped.
#[derive(Debug)]
pub struct RecordQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    depth: Arc<AtomicUsize>,
    label: Arc<str>,
}

impl<T> Clone for RecordQueue<T> {
    fn clone(&self) -> Self {
        RecordQueue {
            tx: self.tx.clone(),
            depth: self.depth.clone(),
            label: self.label.clone(),
        }
    }
}

impl<T> RecordQueue<T> {
    /// Enqueue a record without blocking.
    ///
    /// Fails only when the consumer side is gone, which producers should
    /// treat as "stop producing".
    pub fn push(&self, record: T) -> Result<()> {
        self.tx
            .send(record)
            .map_err(|_| Error::transport(format!("record queue '{}' is closed", self.label)))?;
        self.depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Records currently buffered (best effort).
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Whether the queue is currently empty (best effort).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Consumer-side pull source over a live queue.
#[derive(Debug)]
pub struct QueueSource<T> {
    rx: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
    timeout: Duration,
    label: Arc<str>,
}

#[async_trait]
impl<T: Send> RecordSource<T> for QueueSource<T> {
    fn describe(&self) -> &str {
        &self.label
    }

    fn has_next(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    async fn next(&mut self) -> Result<SourcePoll<T>> {
        match time::timeout(self.timeout, self.rx.recv()).await {
            Err(_) => Ok(SourcePoll::Empty),
            Ok(Some(record)) => {
                let _ = self
                    .depth
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
                        Some(d.saturating_sub(1))
                    });
                Ok(SourcePoll::Record(record))
            }
            Ok(None) => Err(Error::transport(format!(
                "producer side of queue '{}' disconnected",
                self.label
            ))),
        }
    }
}
