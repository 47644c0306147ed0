//! Event builder boundary
//!
//! The pipeline never interprets physics payloads itself; an externally
//! supplied [`EventBuilder`] turns a structured record into a domain event.
//! Builders typically consult detector geometry and conditions data, which
//! is why the detector name is configured explicitly up front instead of
//! being looked up through process-global state.

use async_trait::async_trait;

use crate::record::{DomainEvent, StructuredRecord};

/// Builds domain events from structured records.
///
/// Implementations may keep run-scoped state (pedestals, channel maps).
/// Control frames are delivered through [`on_non_physics_frame`], so a
/// builder sees every PRESTART and can reset that state when a new run
/// begins - including when the pipeline is configured to keep looping
/// across run boundaries.
///
/// [`on_non_physics_frame`]: EventBuilder::on_non_physics_frame
#[async_trait]
pub trait EventBuilder: Send {
    /// Point the builder at a detector model. Called once during pipeline
    /// assembly, before any record is delivered.
    fn configure_detector(&mut self, name: &str);

    /// Whether this record should be built into a domain event.
    fn is_physics_frame(&self, record: &StructuredRecord) -> bool {
        record.is_physics()
    }

    /// Observe a control frame without building an event. The default does
    /// nothing.
    async fn on_non_physics_frame(&mut self, record: &StructuredRecord) -> anyhow::Result<()> {
        let _ = record;
        Ok(())
    }

    /// Build the domain event for a physics record.
    async fn build(&mut self, record: &StructuredRecord) -> anyhow::Result<DomainEvent>;
}
