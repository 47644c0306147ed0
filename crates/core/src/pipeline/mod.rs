//! Run-controlled conversion pipeline
//!
//! A [`Pipeline`] assembles the stage chain for a configuration, then
//! [`Pipeline::spawn`] moves it onto a dedicated task that owns every stage
//! for the pipeline's whole life. The task parks between runs, cycles while
//! a `go` is in effect, and applies control commands only at cycle
//! boundaries, so a record is never abandoned halfway through conversion.
//!
//! Callers interact through the returned [`PipelineHandle`]: commands go in
//! over an unbounded channel, status comes back over a watch channel that
//! always holds the latest [`PipelineStatus`] snapshot.

mod config;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::builder::EventBuilder;
use crate::consumer::{ConsumerChain, EventConsumer};
use crate::error::{Error, Result};
use crate::record::{CycleContext, DomainEvent, RawEvent, StructuredRecord};
use crate::source::{record_queue, FileSource, QueueSource, RecordQueue};
use crate::stage::{EtStage, EvioStage, LcioStage, Stage, StageOutcome};

pub use config::{BuildTarget, DataSource, PipelineConfig};

/// Run-control state of the pipeline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineState {
    /// Created, no cycle has run yet.
    Idle,
    /// Executing cycles.
    Looping,
    /// Parked between cycles, resumable.
    Paused,
    /// Halted for good. Terminal.
    Done,
}

/// Why the pipeline stopped cycling at a data boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryReason {
    /// An end-of-run control frame was observed.
    RunBoundary,
    /// The source is permanently exhausted.
    EndOfInput,
    /// The configured record ceiling was reached.
    EventLimit,
}

impl std::fmt::Display for BoundaryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundaryReason::RunBoundary => write!(f, "run boundary"),
            BoundaryReason::EndOfInput => write!(f, "end of input"),
            BoundaryReason::EventLimit => write!(f, "event limit reached"),
        }
    }
}

/// Monotonic progress counters, published with every status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    /// Cycles started, including empty polls.
    pub cycles: u64,
    /// Records pulled from the source and not returned.
    pub records_consumed: u64,
    /// Domain events delivered to the consumer chain.
    pub events_built: u64,
    /// Cycles that ended without a record.
    pub empty_polls: u64,
    /// Event number of the most recent record that carried one.
    pub last_event_number: Option<u64>,
    /// Run number from the most recent run-start frame.
    pub run_number: Option<u32>,
}

/// Snapshot of the pipeline visible through the handle's watch channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    /// Current run-control state.
    pub state: PipelineState,
    /// Message of the most recent fatal cycle error, if any.
    pub last_error: Option<String>,
    /// Why cycling stopped, once it has.
    pub boundary: Option<BoundaryReason>,
    /// Progress counters.
    pub counters: PipelineCounters,
}

impl PipelineStatus {
    fn idle() -> PipelineStatus {
        PipelineStatus {
            state: PipelineState::Idle,
            last_error: None,
            boundary: None,
            counters: PipelineCounters::default(),
        }
    }

    /// Serialize the snapshot for status endpoints and log sinks.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Go,
    GoN(u64),
    Pause,
    Stop,
}

/// A configured pipeline, ready to be spawned onto its task.
pub struct Pipeline {
    config: PipelineConfig,
    event_builder: Option<Box<dyn EventBuilder>>,
    consumers: ConsumerChain,
    raw_queue: Option<RecordQueue<RawEvent>>,
    raw_source: Option<QueueSource<RawEvent>>,
}

impl Pipeline {
    /// Validate the configuration and set up the input side.
    ///
    /// For a live-queue source this creates the producer/consumer pair up
    /// front so transports can start pushing before the task is spawned;
    /// pushed records buffer until the first cycle drains them.
    pub fn new(config: PipelineConfig) -> Result<Pipeline> {
        config.validate()?;

        let (raw_queue, raw_source) = if matches!(config.source, DataSource::EtRing) {
            let (queue, source) = record_queue(config.name.clone(), config.queue_timeout());
            (Some(queue), Some(source))
        } else {
            (None, None)
        };

        Ok(Pipeline {
            config,
            event_builder: None,
            consumers: ConsumerChain::new(),
            raw_queue,
            raw_source,
        })
    }

    /// Attach the event builder used when the target is the domain
    /// representation.
    pub fn with_event_builder(mut self, builder: Box<dyn EventBuilder>) -> Self {
        self.event_builder = Some(builder);
        self
    }

    /// Append a consumer to the delivery chain.
    pub fn with_consumer(mut self, consumer: Box<dyn EventConsumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// Producer handle for the live-queue source. `None` unless the source
    /// is the live queue.
    pub fn raw_input(&self) -> Option<RecordQueue<RawEvent>> {
        self.raw_queue.clone()
    }

    /// Assemble the stage chain and move the pipeline onto its own task.
    ///
    /// The task starts parked in [`PipelineState::Idle`]; nothing is read
    /// from the source until the first `go`.
    pub async fn spawn(self) -> Result<PipelineHandle> {
        let name = self.config.name.clone();
        let stages = assemble(&self.config, self.raw_source, self.event_builder).await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PipelineStatus::idle());

        let worker = Worker {
            name: name.clone(),
            stages,
            consumers: self.consumers,
            ctx: CycleContext::new(),
            stop_on_errors: self.config.stop_on_errors,
            stop_on_run_boundary: self.config.stop_on_run_boundary,
            max_records: self.config.max_records,
            state: PipelineState::Idle,
            budget: None,
            counters: PipelineCounters::default(),
            last_error: None,
            boundary: None,
            command_rx,
            status_tx,
        };

        let join = tokio::spawn(worker.run());
        info!(station = %name, "Pipeline task spawned");

        Ok(PipelineHandle {
            commands: command_tx,
            status: status_rx,
            join,
        })
    }
}

/// Build the stage chain for a configuration.
///
/// The source representation decides where the chain starts and the target
/// decides where it ends; replaying a file of an intermediate representation
/// skips the stages before it.
async fn assemble(
    config: &PipelineConfig,
    raw_source: Option<QueueSource<RawEvent>>,
    event_builder: Option<Box<dyn EventBuilder>>,
) -> Result<Vec<Box<dyn Stage>>> {
    let mut stages: Vec<Box<dyn Stage>> = Vec::new();

    match &config.source {
        DataSource::EtRing => {
            let source = raw_source
                .ok_or_else(|| Error::Config("live-queue source was not initialized".to_string()))?;
            stages.push(Box::new(EtStage::new(Box::new(source))));
            stages.push(Box::new(EvioStage::from_upstream()));
        }
        DataSource::EtFile { path } => {
            let source: FileSource<RawEvent> = FileSource::open(path).await?;
            stages.push(Box::new(EtStage::new(Box::new(source))));
            stages.push(Box::new(EvioStage::from_upstream()));
        }
        DataSource::EvioFile { path } => {
            let source: FileSource<StructuredRecord> = FileSource::open(path).await?;
            stages.push(Box::new(EvioStage::from_source(Box::new(source))));
        }
        DataSource::LcioFile { path } => {
            let source: FileSource<DomainEvent> = FileSource::open(path).await?;
            stages.push(Box::new(LcioStage::from_source(Box::new(source))));
            return Ok(stages);
        }
    }

    if config.target == BuildTarget::Domain {
        let mut builder = event_builder.ok_or_else(|| {
            Error::Config("a domain build target requires an event builder".to_string())
        })?;
        if let Some(detector) = &config.detector {
            builder.configure_detector(detector);
        }
        stages.push(Box::new(LcioStage::with_builder(builder)));
    }

    Ok(stages)
}

/// Control surface for a spawned pipeline.
///
/// Cloneable status is read from the watch channel without contacting the
/// task. Commands are fire-and-forget; they take effect at the next cycle
/// boundary.
#[derive(Debug)]
pub struct PipelineHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<PipelineStatus>,
    join: JoinHandle<()>,
}

impl PipelineHandle {
    /// Start cycling until a halt condition or a `pause`.
    pub fn go(&self) -> Result<()> {
        self.send(Command::Go)
    }

    /// Cycle until `count` records have been consumed, then pause. Empty
    /// polls do not count against the budget. `go_n(0)` parks the pipeline
    /// without running a cycle.
    pub fn go_n(&self, count: u64) -> Result<()> {
        self.send(Command::GoN(count))
    }

    /// Park the pipeline at the next cycle boundary.
    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    /// Halt the pipeline for good.
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Terminated)
    }

    /// Latest status snapshot.
    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status satisfies the predicate and return the
    /// matching snapshot. Fails if the task ends without ever satisfying
    /// it.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&PipelineStatus) -> bool,
    ) -> Result<PipelineStatus> {
        self.status
            .wait_for(predicate)
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| Error::Terminated)
    }

    /// Wait until the pipeline reaches the given state and return the
    /// snapshot that first carried it. Returns the final snapshot if the
    /// task ends without reaching the state.
    pub async fn wait_state(&mut self, state: PipelineState) -> PipelineStatus {
        loop {
            let snapshot = self.status.borrow_and_update().clone();
            if snapshot.state == state {
                return snapshot;
            }
            if self.status.changed().await.is_err() {
                return self.status.borrow().clone();
            }
        }
    }

    /// Wait for the terminal state.
    pub async fn wait_done(&mut self) -> PipelineStatus {
        self.wait_state(PipelineState::Done).await
    }

    /// Wait for the pipeline task itself to exit.
    pub async fn join(self) -> Result<()> {
        self.join
            .await
            .map_err(|e| Error::Other(format!("pipeline task panicked: {e}")))
    }
}

struct Worker {
    name: String,
    stages: Vec<Box<dyn Stage>>,
    consumers: ConsumerChain,
    ctx: CycleContext,
    stop_on_errors: bool,
    stop_on_run_boundary: bool,
    max_records: Option<u64>,
    state: PipelineState,
    /// Remaining record budget of a `go_n`. `None` means unbounded.
    budget: Option<u64>,
    counters: PipelineCounters,
    last_error: Option<String>,
    boundary: Option<BoundaryReason>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<PipelineStatus>,
}

impl Worker {
    async fn run(mut self) {
        info!(station = %self.name, "Pipeline task started");

        loop {
            match self.state {
                PipelineState::Idle | PipelineState::Paused => {
                    match self.command_rx.recv().await {
                        Some(command) => self.apply(command),
                        // Every handle is gone and no cycle is pending, so
                        // nothing can ever wake the task again.
                        None => {
                            debug!(station = %self.name, "All handles dropped while parked; stopping");
                            self.state = PipelineState::Done;
                        }
                    }
                }
                PipelineState::Looping => {
                    self.drain_commands();
                    if self.state == PipelineState::Looping {
                        self.cycle().await;
                    }
                }
                PipelineState::Done => {}
            }

            self.publish();
            if self.state == PipelineState::Done {
                break;
            }
        }

        info!(
            station = %self.name,
            cycles = self.counters.cycles,
            records = self.counters.records_consumed,
            events = self.counters.events_built,
            boundary = ?self.boundary,
            "Pipeline task ended"
        );
    }

    /// Apply every command already queued. Commands only take effect here,
    /// between cycles.
    fn drain_commands(&mut self) {
        loop {
            match self.command_rx.try_recv() {
                Ok(command) => self.apply(command),
                Err(mpsc::error::TryRecvError::Empty) => break,
                // Handles are gone but a run is in progress; keep cycling
                // to the natural halt condition.
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Go => {
                info!(station = %self.name, "Run command: go");
                self.budget = None;
                self.state = PipelineState::Looping;
            }
            Command::GoN(0) => {
                info!(station = %self.name, "Run command: go 0; parking");
                self.budget = None;
                self.state = PipelineState::Paused;
            }
            Command::GoN(count) => {
                info!(station = %self.name, count, "Run command: go N");
                self.budget = Some(count);
                self.state = PipelineState::Looping;
            }
            Command::Pause => {
                if self.state == PipelineState::Looping {
                    info!(station = %self.name, "Run command: pause");
                    self.state = PipelineState::Paused;
                }
            }
            Command::Stop => {
                info!(station = %self.name, "Run command: stop");
                self.state = PipelineState::Done;
            }
        }
    }

    /// Run the stage chain once and apply the outcome policies.
    async fn cycle(&mut self) {
        self.ctx.reset();
        self.counters.cycles += 1;

        let mut outcome = StageOutcome::Continue;
        for stage in &mut self.stages {
            match stage.execute(&mut self.ctx).await {
                StageOutcome::Continue => {}
                other => {
                    outcome = other;
                    break;
                }
            }
        }

        if let Some(number) = self.ctx.event_number() {
            self.counters.last_event_number = Some(number);
        }
        if let Some(run) = self.ctx.run_number() {
            self.counters.run_number = Some(run);
        }

        match outcome {
            StageOutcome::Continue => {
                self.note_record_consumed();
                if let Some(event) = self.ctx.take_domain() {
                    match self.consumers.deliver(&event).await {
                        Ok(()) => self.counters.events_built += 1,
                        Err(e) => self.fatal(e),
                    }
                }
            }
            StageOutcome::Empty => {
                self.counters.empty_polls += 1;
            }
            StageOutcome::RunBoundary => {
                self.note_record_consumed();
                self.boundary = Some(BoundaryReason::RunBoundary);
                if self.stop_on_run_boundary {
                    info!(station = %self.name, run = ?self.counters.run_number, "Halting at run boundary");
                    self.state = PipelineState::Done;
                } else {
                    info!(station = %self.name, run = ?self.counters.run_number, "Continuing past run boundary");
                }
            }
            StageOutcome::EndOfInput => {
                info!(station = %self.name, "Input exhausted");
                self.boundary = Some(BoundaryReason::EndOfInput);
                self.state = PipelineState::Done;
            }
            StageOutcome::Fatal(e) => {
                // A transport failure pulled nothing from the source; any
                // other fatal error abandoned a record it had consumed.
                if !e.is_transport() {
                    self.note_record_consumed();
                }
                self.fatal(e);
            }
        }

        if self.state != PipelineState::Done {
            if let Some(max) = self.max_records {
                if self.counters.records_consumed >= max {
                    info!(station = %self.name, max_records = max, "Event limit reached");
                    self.boundary = Some(BoundaryReason::EventLimit);
                    self.state = PipelineState::Done;
                }
            }
        }
    }

    /// Count a consumed record against the counters and any `go_n` budget.
    fn note_record_consumed(&mut self) {
        self.counters.records_consumed += 1;
        if let Some(budget) = &mut self.budget {
            *budget -= 1;
            if *budget == 0 {
                self.budget = None;
                if self.state == PipelineState::Looping {
                    debug!(station = %self.name, "Record budget exhausted; pausing");
                    self.state = PipelineState::Paused;
                }
            }
        }
    }

    fn fatal(&mut self, e: Error) {
        let transport = e.is_transport();
        if transport || self.stop_on_errors {
            error!(station = %self.name, error = %e, "Cycle failed; halting");
            self.state = PipelineState::Done;
        } else {
            warn!(station = %self.name, error = %e, "Cycle failed; continuing");
        }
        self.last_error = Some(e.to_string());
    }

    fn publish(&self) {
        self.status_tx.send_replace(PipelineStatus {
            state: self.state,
            last_error: self.last_error.clone(),
            boundary: self.boundary,
            counters: self.counters,
        });
    }
}
