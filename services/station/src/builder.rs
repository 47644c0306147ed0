//! Diagnostic event builder
//!
//! Turns the banks of a physics frame into plainly typed collections so a
//! station can be exercised end to end without detector-specific
//! reconstruction code. Floating-point banks become calorimeter hits,
//! integer banks become tracker samples, raw banks are carried as blobs.

use async_trait::async_trait;
use tracing::{debug, info};

use evflow_core::record::{tags, Bank, BankPayload, DomainEvent, DomainObject, StructuredRecord};
use evflow_core::EventBuilder;

/// Builder used by the station binary for loopback and replay runs.
#[derive(Debug, Default)]
pub struct DiagnosticEventBuilder {
    detector: Option<String>,
    run: u32,
    events: u64,
}

impl DiagnosticEventBuilder {
    /// Collect typed objects from one bank, descending into containers.
    fn harvest(
        bank: &Bank,
        hits: &mut Vec<DomainObject>,
        samples: &mut Vec<DomainObject>,
        blobs: &mut Vec<DomainObject>,
    ) {
        if bank.tag == tags::EVENT_ID {
            return;
        }
        match &bank.payload {
            BankPayload::Banks(children) => {
                for child in children {
                    Self::harvest(child, hits, samples, blobs);
                }
            }
            BankPayload::F64(values) => {
                let base = (bank.tag as u64) << 32;
                hits.extend(values.iter().enumerate().map(|(i, &raw_energy)| {
                    DomainObject::CalorimeterHit {
                        channel: base | i as u64,
                        raw_energy,
                        time_ns: 0.0,
                    }
                }));
            }
            BankPayload::U32(words) => {
                samples.push(DomainObject::TrackerSample {
                    channel: (bank.tag as u64) << 32 | bank.number as u64,
                    adc: words.iter().map(|&w| (w & 0xFFFF) as u16).collect(),
                });
            }
            BankPayload::Raw(bytes) => {
                blobs.push(DomainObject::Blob(bytes.clone()));
            }
        }
    }
}

#[async_trait]
impl EventBuilder for DiagnosticEventBuilder {
    fn configure_detector(&mut self, name: &str) {
        debug!(detector = %name, "Diagnostic builder configured");
        self.detector = Some(name.to_string());
    }

    async fn on_non_physics_frame(&mut self, record: &StructuredRecord) -> anyhow::Result<()> {
        if let Some(info) = record.prestart_info() {
            info!(
                run = info.run,
                run_type = info.run_type,
                "Run started"
            );
            self.run = info.run;
        } else if let Some(info) = record.end_info() {
            info!(
                run = self.run,
                total_events = info.total_events,
                built = self.events,
                "Run ended"
            );
        } else {
            debug!(tag = record.root().tag, "Control frame observed");
        }
        Ok(())
    }

    async fn build(&mut self, record: &StructuredRecord) -> anyhow::Result<DomainEvent> {
        let number = record
            .event_number()
            .ok_or_else(|| anyhow::anyhow!("physics frame carries no event-number bank"))?;

        let mut hits = Vec::new();
        let mut samples = Vec::new();
        let mut blobs = Vec::new();
        for bank in record.root().children() {
            Self::harvest(bank, &mut hits, &mut samples, &mut blobs);
        }

        let mut event = DomainEvent::new(self.run, number);
        if !hits.is_empty() {
            event.put("EcalHits", hits)?;
        }
        if !samples.is_empty() {
            event.put("SvtSamples", samples)?;
        }
        if !blobs.is_empty() {
            event.put("RawBlobs", blobs)?;
        }

        self.events += 1;
        Ok(event)
    }
}
