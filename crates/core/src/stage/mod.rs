//! Conversion stages
//!
//! Each stage advances the shared [`CycleContext`] by one representation:
//! [`EtStage`] pulls raw network events, [`EvioStage`] parses them into
//! structured banked records, [`LcioStage`] builds domain events. The
//! control loop runs the configured stages in order once per cycle and
//! stops the cycle at the first non-`Continue` outcome.
//!
//! Outcomes are data, not exceptions: the loop pattern-matches on
//! [`StageOutcome`] so the scheduling signals (`Empty`), the expected
//! terminations (`RunBoundary`, `EndOfInput`) and genuine faults (`Fatal`)
//! stay distinct all the way up.

mod et;
mod evio;
mod lcio;

pub use et::EtStage;
pub use evio::EvioStage;
pub use lcio::LcioStage;

use async_trait::async_trait;

use crate::error::Error;
use crate::record::CycleContext;

/// What one stage execution did to the cycle.
#[derive(Debug)]
pub enum StageOutcome {
    /// Stage produced its output; run the next stage.
    Continue,
    /// No input available yet; end the cycle quietly and poll again.
    Empty,
    /// An end-of-run control frame was observed; end the cycle here.
    RunBoundary,
    /// The stage's file-backed source is exhausted.
    EndOfInput,
    /// The cycle failed; the error decides whether the pipeline halts.
    Fatal(Error),
}

/// One representation transition, executed once per cycle against the
/// shared context.
#[async_trait]
pub trait Stage: Send {
    /// Short stage name for logs.
    fn name(&self) -> &'static str;

    /// Run this stage for the current cycle.
    async fn execute(&mut self, ctx: &mut CycleContext) -> StageOutcome;
}
