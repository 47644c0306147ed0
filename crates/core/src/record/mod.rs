//! Record representations
//!
//! Detector data passes through three representations: an opaque
//! [`RawEvent`] delivered by the transport layer, a parsed
//! [`StructuredRecord`] bank tree, and the fully built [`DomainEvent`]
//! consumed by analysis code. [`CycleContext`] is the per-cycle slot set the
//! stages fill in as a record moves downstream.

pub mod bank;
pub mod event;

pub use bank::{
    end_frame, go_frame, physics_frame, prestart_frame, tags, Bank, BankPayload, ControlFrame,
    EndInfo, PrestartInfo, StructuredRecord, PHYSICS_EVENT_TAG,
};
pub use event::{DomainEvent, DomainObject};

use serde::{Deserialize, Serialize};

/// An opaque byte buffer from the event transport, before any structure is
/// imposed. Transient: lives for one pipeline cycle at most.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Sequence number assigned by the transport layer.
    pub sequence: u64,
    /// The undecoded frame.
    pub payload: Vec<u8>,
}

impl RawEvent {
    /// Wrap a transport frame.
    pub fn new(sequence: u64, payload: Vec<u8>) -> RawEvent {
        RawEvent { sequence, payload }
    }

    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the frame is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Per-cycle shared context threaded through the active stages.
///
/// Holds at most one record of each representation plus the resolved event
/// and run numbers. Reset at the start of every cycle; the pipeline keeps no
/// cross-cycle record state here.
#[derive(Debug, Default)]
pub struct CycleContext {
    raw: Option<RawEvent>,
    structured: Option<StructuredRecord>,
    domain: Option<DomainEvent>,
    event_number: Option<u64>,
    run_number: Option<u32>,
}

impl CycleContext {
    /// Fresh, empty context.
    pub fn new() -> CycleContext {
        CycleContext::default()
    }

    /// Clear all slots for the next cycle.
    pub fn reset(&mut self) {
        self.raw = None;
        self.structured = None;
        self.domain = None;
        self.event_number = None;
        self.run_number = None;
    }

    /// Store the raw event for this cycle.
    pub fn set_raw(&mut self, raw: RawEvent) {
        self.raw = Some(raw);
    }

    /// Take the raw event out of the context.
    pub fn take_raw(&mut self) -> Option<RawEvent> {
        self.raw.take()
    }

    /// Store the structured record for this cycle.
    pub fn set_structured(&mut self, record: StructuredRecord) {
        self.structured = Some(record);
    }

    /// The structured record, if one was produced this cycle.
    pub fn structured(&self) -> Option<&StructuredRecord> {
        self.structured.as_ref()
    }

    /// Take the structured record out of the context.
    pub fn take_structured(&mut self) -> Option<StructuredRecord> {
        self.structured.take()
    }

    /// Store the built domain event.
    pub fn set_domain(&mut self, event: DomainEvent) {
        self.domain = Some(event);
    }

    /// Take the domain event for handoff to the consumer chain.
    pub fn take_domain(&mut self) -> Option<DomainEvent> {
        self.domain.take()
    }

    /// Whether a domain event was produced this cycle.
    pub fn has_domain(&self) -> bool {
        self.domain.is_some()
    }

    /// Record the resolved event number.
    pub fn set_event_number(&mut self, n: u64) {
        self.event_number = Some(n);
    }

    /// Event number resolved this cycle, if any.
    pub fn event_number(&self) -> Option<u64> {
        self.event_number
    }

    /// Record the current run number.
    pub fn set_run_number(&mut self, run: u32) {
        self.run_number = Some(run);
    }

    /// Run number in effect this cycle, if known.
    pub fn run_number(&self) -> Option<u32> {
        self.run_number
    }
}
