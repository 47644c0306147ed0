//! Evflow Core - Streaming record conversion for detector data
//!
//! This crate provides the conversion engine that moves detector output
//! between three representations: the raw network event a transport hands
//! over, the structured banked record parsed from it, and the domain event
//! an analysis builder assembles from the banks.
//!
//! # Architecture
//!
//! The engine is a pipeline of stages owned by a single task:
//! - Sources (`RecordSource`) feed records in from a live queue or a
//!   framed capture file
//! - Stages (`EtStage`, `EvioStage`, `LcioStage`) each lift the record one
//!   representation, sharing a per-cycle `CycleContext`
//! - A run-control loop applies `go`/`pause`/`stop` commands at cycle
//!   boundaries and publishes status over a watch channel
//! - Domain events leave through the `EventConsumer` chain
//!
//! Plugin seams (`EventBuilder`, `EventConsumer`) report `anyhow` errors;
//! everything inside the engine uses the typed [`Error`].
//!
//! # Example
//!
//! ```ignore
//! use evflow_core::pipeline::{DataSource, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> evflow_core::Result<()> {
//!     let config = PipelineConfig::new(DataSource::EvioFile {
//!         path: "run_1042.evio".into(),
//!     })
//!     .with_detector("Tracker2021");
//!
//!     let mut handle = Pipeline::new(config)?
//!         .with_event_builder(Box::new(MyBuilder::default()))
//!         .spawn()
//!         .await?;
//!
//!     handle.go()?;
//!     let status = handle.wait_done().await;
//!     println!("{}", status.to_json()?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod consumer;
pub mod pipeline;
pub mod record;
pub mod source;
pub mod stage;

mod error;
pub use error::{Error, Result};

pub use builder::EventBuilder;
pub use consumer::{CollectingConsumer, ConsumerChain, EventConsumer, LoggingConsumer};
pub use pipeline::{
    BoundaryReason, BuildTarget, DataSource, Pipeline, PipelineConfig, PipelineHandle,
    PipelineState, PipelineStatus,
};
pub use record::{DomainEvent, DomainObject, RawEvent, StructuredRecord};
pub use source::{RecordQueue, RecordSource, SourcePoll};
