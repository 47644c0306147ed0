//! Raw event receipt

use async_trait::async_trait;
use tracing::debug;

use crate::record::{CycleContext, RawEvent};
use crate::source::{RecordSource, SourcePoll};
use crate::stage::{Stage, StageOutcome};

/// Pulls one raw network event per cycle into the context.
///
/// The source is either the live queue fed by the event-transport receiver
/// or a framed capture file for deterministic replay; the stage does not
/// care which.
pub struct EtStage {
    source: Box<dyn RecordSource<RawEvent>>,
}

impl EtStage {
    /// Stage reading from the given raw-event source.
    pub fn new(source: Box<dyn RecordSource<RawEvent>>) -> EtStage {
        EtStage { source }
    }
}

#[async_trait]
impl Stage for EtStage {
    fn name(&self) -> &'static str {
        "et"
    }

    async fn execute(&mut self, ctx: &mut CycleContext) -> StageOutcome {
        match self.source.next().await {
            Ok(SourcePoll::Record(raw)) => {
                debug!(
                    sequence = raw.sequence,
                    bytes = raw.len(),
                    source = self.source.describe(),
                    "Raw event received"
                );
                ctx.set_raw(raw);
                StageOutcome::Continue
            }
            Ok(SourcePoll::Empty) => StageOutcome::Empty,
            Ok(SourcePoll::EndOfInput) => StageOutcome::EndOfInput,
            Err(e) => StageOutcome::Fatal(e),
        }
    }
}
