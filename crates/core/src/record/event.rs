//! Domain physics events
//!
//! The final representation handed to the consumer chain: a run number, an
//! event number and named, typed collections. Collections keep their
//! insertion order and are write-once per name for a given event; the
//! pipeline never mutates an event after handing it downstream.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One reconstructed object inside a named collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainObject {
    /// Calorimeter readout hit.
    CalorimeterHit {
        /// Packed channel identifier.
        channel: u64,
        /// Uncalibrated energy.
        raw_energy: f64,
        /// Hit time in nanoseconds relative to the event.
        time_ns: f64,
    },
    /// Tracker ADC samples for one channel.
    TrackerSample {
        /// Packed channel identifier.
        channel: u64,
        /// Raw ADC counts.
        adc: Vec<u16>,
    },
    /// Uninterpreted payload carried through for downstream decoding.
    Blob(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Collection {
    name: String,
    objects: Vec<DomainObject>,
}

/// A fully built physics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    run_number: u32,
    event_number: u64,
    collections: Vec<Collection>,
}

impl DomainEvent {
    /// New event with no collections yet.
    pub fn new(run_number: u32, event_number: u64) -> DomainEvent {
        DomainEvent {
            run_number,
            event_number,
            collections: Vec::new(),
        }
    }

    /// Run this event belongs to.
    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    /// Event number within the run.
    pub fn event_number(&self) -> u64 {
        self.event_number
    }

    /// Add a named collection. Each name may be populated exactly once.
    pub fn put(&mut self, name: impl Into<String>, objects: Vec<DomainObject>) -> Result<()> {
        let name = name.into();
        if self.collections.iter().any(|c| c.name == name) {
            return Err(Error::DuplicateCollection { name });
        }
        self.collections.push(Collection { name, objects });
        Ok(())
    }

    /// Objects of a named collection.
    pub fn get(&self, name: &str) -> Option<&[DomainObject]> {
        self.collections
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.objects.as_slice())
    }

    /// Whether a collection with this name exists.
    pub fn has(&self, name: &str) -> bool {
        self.collections.iter().any(|c| c.name == name)
    }

    /// Collection names in insertion order.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.iter().map(|c| c.name.as_str())
    }

    /// Number of collections.
    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }
}
