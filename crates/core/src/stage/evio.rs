//! Structured record construction
//!
//! Parses the cycle's raw bytes into a banked record, resolves the event
//! number from the identifier bank, tracks the current run from
//! PRESTART/END control frames and enforces that physics event numbers
//! never decrease within a run. When the pipeline starts at the structured
//! representation the stage instead pulls pre-parsed records from its own
//! source; those already carry their event numbers.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Error;
use crate::record::{CycleContext, StructuredRecord};
use crate::source::{RecordSource, SourcePoll};
use crate::stage::{Stage, StageOutcome};

enum EvioInput {
    /// Parse the raw event left in the context by the previous stage.
    Upstream,
    /// Pull pre-parsed records directly.
    Source(Box<dyn RecordSource<StructuredRecord>>),
}

/// Builds the structured record for the cycle and classifies it.
pub struct EvioStage {
    input: EvioInput,
    /// Highest physics event number seen in the current run.
    watermark: Option<u64>,
    current_run: Option<u32>,
}

impl EvioStage {
    /// Stage parsing raw events produced upstream in the same cycle.
    pub fn from_upstream() -> EvioStage {
        EvioStage {
            input: EvioInput::Upstream,
            watermark: None,
            current_run: None,
        }
    }

    /// Stage pulling pre-parsed structured records from its own source.
    pub fn from_source(source: Box<dyn RecordSource<StructuredRecord>>) -> EvioStage {
        EvioStage {
            input: EvioInput::Source(source),
            watermark: None,
            current_run: None,
        }
    }
}

#[async_trait]
impl Stage for EvioStage {
    fn name(&self) -> &'static str {
        "evio"
    }

    async fn execute(&mut self, ctx: &mut CycleContext) -> StageOutcome {
        let record = match &mut self.input {
            EvioInput::Upstream => {
                let raw = match ctx.take_raw() {
                    Some(raw) => raw,
                    None => {
                        return StageOutcome::Fatal(Error::Protocol {
                            message: "no raw event in context; stage ordering broken".to_string(),
                        })
                    }
                };
                let origin = format!("raw event {}", raw.sequence);
                match StructuredRecord::from_wire(&raw.payload, &origin) {
                    Ok(record) => record,
                    Err(e) => return StageOutcome::Fatal(e),
                }
            }
            EvioInput::Source(source) => match source.next().await {
                Ok(SourcePoll::Record(record)) => record,
                Ok(SourcePoll::Empty) => return StageOutcome::Empty,
                Ok(SourcePoll::EndOfInput) => return StageOutcome::EndOfInput,
                Err(e) => return StageOutcome::Fatal(e),
            },
        };

        if let Some(info) = record.prestart_info() {
            debug!(run = info.run, run_type = info.run_type, "Run started");
            self.current_run = Some(info.run);
            self.watermark = None;
        }
        if let Some(run) = self.current_run {
            ctx.set_run_number(run);
        }
        if let Some(n) = record.event_number() {
            ctx.set_event_number(n);
        }

        if record.is_end() {
            let total = record.end_info().map(|info| info.total_events);
            debug!(run = ?self.current_run, total_events = ?total, "Run ended");
            self.watermark = None;
            ctx.set_structured(record);
            return StageOutcome::RunBoundary;
        }

        if record.is_physics() {
            if let Some(n) = record.event_number() {
                if let Some(prev) = self.watermark {
                    if n < prev {
                        return StageOutcome::Fatal(Error::Protocol {
                            message: format!(
                                "event number {} after {} within run {}",
                                n,
                                prev,
                                self.current_run
                                    .map(|r| r.to_string())
                                    .unwrap_or_else(|| "unknown".to_string())
                            ),
                        });
                    }
                }
                self.watermark = Some(n);
            }
        }

        ctx.set_structured(record);
        StageOutcome::Continue
    }
}
