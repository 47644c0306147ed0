//! Domain event construction
//!
//! Physics records are handed to the external [`EventBuilder`]; control
//! frames that reach this stage go to the builder's metadata hook instead
//! and the cycle continues without producing an event. When the pipeline
//! reads a domain-event capture file the stage pulls events directly and
//! the builder is not involved at all.

use async_trait::async_trait;
use tracing::debug;

use crate::builder::EventBuilder;
use crate::error::Error;
use crate::record::{CycleContext, DomainEvent};
use crate::source::{RecordSource, SourcePoll};
use crate::stage::{Stage, StageOutcome};

enum LcioInput {
    /// Build events from the structured record produced upstream.
    Builder(Box<dyn EventBuilder>),
    /// Pull ready-made domain events directly.
    Source(Box<dyn RecordSource<DomainEvent>>),
}

/// Produces the cycle's domain event.
pub struct LcioStage {
    input: LcioInput,
}

impl LcioStage {
    /// Stage delegating to an event builder.
    pub fn with_builder(builder: Box<dyn EventBuilder>) -> LcioStage {
        LcioStage {
            input: LcioInput::Builder(builder),
        }
    }

    /// Stage pulling domain events from its own source.
    pub fn from_source(source: Box<dyn RecordSource<DomainEvent>>) -> LcioStage {
        LcioStage {
            input: LcioInput::Source(source),
        }
    }
}

#[async_trait]
impl Stage for LcioStage {
    fn name(&self) -> &'static str {
        "lcio"
    }

    async fn execute(&mut self, ctx: &mut CycleContext) -> StageOutcome {
        match &mut self.input {
            LcioInput::Source(source) => match source.next().await {
                Ok(SourcePoll::Record(event)) => {
                    ctx.set_event_number(event.event_number());
                    ctx.set_run_number(event.run_number());
                    ctx.set_domain(event);
                    StageOutcome::Continue
                }
                Ok(SourcePoll::Empty) => StageOutcome::Empty,
                Ok(SourcePoll::EndOfInput) => StageOutcome::EndOfInput,
                Err(e) => StageOutcome::Fatal(e),
            },
            LcioInput::Builder(builder) => {
                let record = match ctx.take_structured() {
                    Some(record) => record,
                    None => {
                        return StageOutcome::Fatal(Error::Protocol {
                            message: "no structured record in context; stage ordering broken"
                                .to_string(),
                        })
                    }
                };

                if builder.is_physics_frame(&record) {
                    match builder.build(&record).await {
                        Ok(event) => {
                            debug!(
                                run = event.run_number(),
                                event = event.event_number(),
                                collections = event.collection_count(),
                                "Domain event built"
                            );
                            ctx.set_domain(event);
                            StageOutcome::Continue
                        }
                        Err(e) => StageOutcome::Fatal(Error::Builder { source: e }),
                    }
                } else {
                    match builder.on_non_physics_frame(&record).await {
                        Ok(()) => StageOutcome::Continue,
                        Err(e) => StageOutcome::Fatal(Error::Builder { source: e }),
                    }
                }
            }
        }
    }
}
