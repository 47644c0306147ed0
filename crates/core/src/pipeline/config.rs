//! Pipeline configuration
//!
//! Declarative assembly: the {source representation, target representation}
//! pair decides which stages are active, and the policy flags decide what
//! halts the loop. Configurations deserialize from station config files and
//! can also be built fluently in code.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where records enter the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DataSource {
    /// Live raw events pushed into the station's queue by a transport task.
    EtRing,
    /// Raw-event capture file, replayed deterministically.
    EtFile {
        /// Capture file path.
        path: PathBuf,
    },
    /// Structured-record capture file.
    EvioFile {
        /// Capture file path.
        path: PathBuf,
    },
    /// Domain-event capture file.
    LcioFile {
        /// Capture file path.
        path: PathBuf,
    },
}

impl DataSource {
    /// Whether records enter as raw bytes needing the parse stage chain.
    pub fn starts_at_raw(&self) -> bool {
        matches!(self, DataSource::EtRing | DataSource::EtFile { .. })
    }
}

/// How far each record is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildTarget {
    /// Stop after the structured banked record.
    Structured,
    /// Build through to the domain event.
    Domain,
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Station name used in logs and status output.
    #[serde(default = "default_name")]
    pub name: String,

    /// Where records come from.
    pub source: DataSource,

    /// How far to build each record.
    #[serde(default = "default_target")]
    pub target: BuildTarget,

    /// Halt on fatal cycle errors. Transport failures halt regardless.
    #[serde(default = "default_true")]
    pub stop_on_errors: bool,

    /// Halt when an end-of-run control frame is observed.
    #[serde(default = "default_true")]
    pub stop_on_run_boundary: bool,

    /// How long one cycle waits on a live queue before yielding an empty
    /// poll, in milliseconds.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    /// Optional ceiling on record-consuming cycles; reaching it halts the
    /// pipeline.
    #[serde(default)]
    pub max_records: Option<u64>,

    /// Detector name handed to the event builder during assembly.
    #[serde(default)]
    pub detector: Option<String>,
}

fn default_name() -> String {
    "station".to_string()
}

fn default_target() -> BuildTarget {
    BuildTarget::Domain
}

fn default_true() -> bool {
    true
}

fn default_queue_timeout_ms() -> u64 {
    500
}

impl PipelineConfig {
    /// Configuration with the given source and default policies.
    pub fn new(source: DataSource) -> PipelineConfig {
        PipelineConfig {
            name: default_name(),
            source,
            target: default_target(),
            stop_on_errors: true,
            stop_on_run_boundary: true,
            queue_timeout_ms: default_queue_timeout_ms(),
            max_records: None,
            detector: None,
        }
    }

    /// Set the station name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the build target.
    pub fn with_target(mut self, target: BuildTarget) -> Self {
        self.target = target;
        self
    }

    /// Set the fatal-error halt policy.
    pub fn with_stop_on_errors(mut self, stop: bool) -> Self {
        self.stop_on_errors = stop;
        self
    }

    /// Set the run-boundary halt policy.
    pub fn with_stop_on_run_boundary(mut self, stop: bool) -> Self {
        self.stop_on_run_boundary = stop;
        self
    }

    /// Set the live-queue poll timeout.
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the record-consumption ceiling.
    pub fn with_max_records(mut self, max: u64) -> Self {
        self.max_records = Some(max);
        self
    }

    /// Set the detector name for the event builder.
    pub fn with_detector(mut self, detector: impl Into<String>) -> Self {
        self.detector = Some(detector.into());
        self
    }

    /// The live-queue poll timeout as a duration.
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    /// Whether assembly needs an event builder.
    pub fn needs_builder(&self) -> bool {
        self.target == BuildTarget::Domain && !matches!(self.source, DataSource::LcioFile { .. })
    }

    /// Reject combinations the stage chain cannot express.
    pub fn validate(&self) -> Result<()> {
        if matches!(self.source, DataSource::LcioFile { .. })
            && self.target == BuildTarget::Structured
        {
            return Err(Error::Config(
                "a domain-event file cannot be replayed to a structured target".to_string(),
            ));
        }
        if self.max_records == Some(0) {
            return Err(Error::Config("max_records must be positive".to_string()));
        }
        if self.queue_timeout_ms == 0 {
            return Err(Error::Config("queue_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}
