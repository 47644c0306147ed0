//! Synthetic record feed
//!
//! Generates framed runs locally and pushes them into the station's live
//! queue, so a full conversion loop can run with no detector attached.
//! Values are deterministic, which keeps loopback runs reproducible.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use evflow_core::record::{
    end_frame, go_frame, physics_frame, prestart_frame, Bank, StructuredRecord,
};
use evflow_core::source::RecordQueue;
use evflow_core::{RawEvent, Result};

use crate::config::SyntheticSection;

/// Pushes generated runs into the live record queue.
pub struct SyntheticFeed {
    settings: SyntheticSection,
    queue: RecordQueue<RawEvent>,
}

impl SyntheticFeed {
    /// Feed for the given settings and queue.
    pub fn new(settings: SyntheticSection, queue: RecordQueue<RawEvent>) -> SyntheticFeed {
        SyntheticFeed { settings, queue }
    }

    /// Generate every configured run. Returns the number of frames pushed.
    pub async fn run(self) -> Result<u64> {
        let mut sequence = 0u64;

        for run_index in 0..self.settings.runs {
            let run = self.settings.start_run + run_index;
            debug!(run, events = self.settings.events_per_run, "Generating run");

            self.push(&mut sequence, prestart_frame(unix_secs(), run, 1))?;
            self.push(&mut sequence, go_frame(unix_secs(), 0))?;

            for event in 1..=self.settings.events_per_run {
                let banks = self.event_banks(event);
                self.push(&mut sequence, physics_frame(event, banks))?;
            }

            self.push(
                &mut sequence,
                end_frame(unix_secs(), self.settings.events_per_run),
            )?;
        }

        info!(
            frames = sequence,
            runs = self.settings.runs,
            "Synthetic feed finished"
        );
        Ok(sequence)
    }

    fn push(&self, sequence: &mut u64, frame: Bank) -> Result<()> {
        let record = StructuredRecord::new(frame);
        self.queue.push(RawEvent::new(*sequence, record.to_wire()))?;
        *sequence += 1;
        Ok(())
    }

    fn event_banks(&self, event: u32) -> Vec<Bank> {
        (0..self.settings.banks_per_event)
            .map(|bank| {
                let values: Vec<f64> = (0..self.settings.words_per_bank)
                    .map(|word| {
                        let seed = event as usize * 31 + bank * 13 + word * 7;
                        (seed % 4000) as f64 * 0.125
                    })
                    .collect();
                Bank::f64_data(0x0100 + bank as u16, 0, values)
            })
            .collect()
    }
}

fn unix_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
