//! Domain-event consumers
//!
//! Completed domain events are handed to an ordered chain of consumers.
//! Each consumer sees every event exactly once, in the order the pipeline
//! built them; a consumer error aborts delivery for that event and is
//! surfaced to the control loop under the usual error policy.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::record::DomainEvent;

/// One downstream processor of completed domain events.
#[async_trait]
pub trait EventConsumer: Send {
    /// Name used in logs and error context.
    fn name(&self) -> &str;

    /// Handle one completed event.
    async fn consume(&mut self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Ordered chain of consumers.
#[derive(Default)]
pub struct ConsumerChain {
    consumers: Vec<Box<dyn EventConsumer>>,
}

impl ConsumerChain {
    /// Empty chain.
    pub fn new() -> ConsumerChain {
        ConsumerChain::default()
    }

    /// Append a consumer; delivery order is append order.
    pub fn push(&mut self, consumer: Box<dyn EventConsumer>) {
        self.consumers.push(consumer);
    }

    /// Number of attached consumers.
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Deliver one event to every consumer in order.
    pub async fn deliver(&mut self, event: &DomainEvent) -> Result<()> {
        for consumer in &mut self.consumers {
            if let Err(e) = consumer.consume(event).await {
                return Err(Error::Consumer {
                    name: consumer.name().to_string(),
                    source: e,
                });
            }
        }
        Ok(())
    }
}

/// Consumer that logs a line per event.
#[derive(Debug, Default)]
pub struct LoggingConsumer;

#[async_trait]
impl EventConsumer for LoggingConsumer {
    fn name(&self) -> &str {
        "event-log"
    }

    async fn consume(&mut self, event: &DomainEvent) -> anyhow::Result<()> {
        info!(
            run = event.run_number(),
            event = event.event_number(),
            collections = event.collection_count(),
            "Domain event delivered"
        );
        Ok(())
    }
}

/// Consumer that stores every event for later inspection. Useful for tests
/// and loopback diagnostics.
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl CollectingConsumer {
    /// New, empty collector.
    pub fn new() -> CollectingConsumer {
        CollectingConsumer::default()
    }

    /// Shared handle to the collected events.
    pub fn collected(&self) -> Arc<Mutex<Vec<DomainEvent>>> {
        self.events.clone()
    }
}

#[async_trait]
impl EventConsumer for CollectingConsumer {
    fn name(&self) -> &str {
        "event-collector"
    }

    async fn consume(&mut self, event: &DomainEvent) -> anyhow::Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow::anyhow!("event store lock poisoned"))?;
        events.push(event.clone());
        Ok(())
    }
}
