//! Station configuration
//!
//! Loaded from a YAML file and/or environment variables. The `source` and
//! `pipeline` sections map onto the core pipeline configuration; the
//! station adds its own identity section and the synthetic feed settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use evflow_core::pipeline::{BuildTarget, DataSource, PipelineConfig};

/// Main configuration for a detector station
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station identity
    #[serde(default)]
    pub station: StationSection,

    /// Where records come from
    #[serde(default)]
    pub source: SourceConfig,

    /// Conversion and run-control settings
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Synthetic feed settings, used when the source is `synthetic`
    #[serde(default)]
    pub synthetic: SyntheticSection,
}

/// Station identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationSection {
    /// Name used in logs and status output
    #[serde(default = "default_station_name")]
    pub name: String,

    /// Detector name handed to the event builder
    #[serde(default)]
    pub detector: Option<String>,
}

fn default_station_name() -> String {
    "station".to_string()
}

impl Default for StationSection {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            detector: None,
        }
    }
}

/// Record source selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceConfig {
    /// Generate frames locally and loop them through the live queue
    Synthetic,
    /// Live queue fed by an external transport task
    EtRing,
    /// Raw-event capture file
    EtFile {
        /// Capture file path
        path: PathBuf,
    },
    /// Structured-record capture file
    EvioFile {
        /// Capture file path
        path: PathBuf,
    },
    /// Domain-event capture file
    LcioFile {
        /// Capture file path
        path: PathBuf,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Synthetic
    }
}

impl SourceConfig {
    /// Whether the station must spawn the synthetic feed task.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, SourceConfig::Synthetic)
    }

    /// The core source this selection maps to. The synthetic feed pushes
    /// into the live queue, so it maps to the queue source.
    pub fn data_source(&self) -> DataSource {
        match self {
            SourceConfig::Synthetic | SourceConfig::EtRing => DataSource::EtRing,
            SourceConfig::EtFile { path } => DataSource::EtFile { path: path.clone() },
            SourceConfig::EvioFile { path } => DataSource::EvioFile { path: path.clone() },
            SourceConfig::LcioFile { path } => DataSource::LcioFile { path: path.clone() },
        }
    }
}

/// Conversion and run-control settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// How far to build each record
    #[serde(default = "default_target")]
    pub target: BuildTarget,

    /// Halt on fatal cycle errors
    #[serde(default = "default_true")]
    pub stop_on_errors: bool,

    /// Halt at end-of-run frames
    #[serde(default = "default_true")]
    pub stop_on_run_boundary: bool,

    /// Live-queue poll timeout in milliseconds
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,

    /// Optional ceiling on consumed records
    #[serde(default)]
    pub max_records: Option<u64>,
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

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            target: default_target(),
            stop_on_errors: default_true(),
            stop_on_run_boundary: default_true(),
            queue_timeout_ms: default_queue_timeout_ms(),
            max_records: None,
        }
    }
}

/// Synthetic feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticSection {
    /// Number of runs to generate
    #[serde(default = "default_runs")]
    pub runs: u32,

    /// Run number of the first generated run
    #[serde(default = "default_start_run")]
    pub start_run: u32,

    /// Physics events per run
    #[serde(default = "default_events_per_run")]
    pub events_per_run: u32,

    /// Data banks per physics event
    #[serde(default = "default_banks_per_event")]
    pub banks_per_event: usize,

    /// Values per data bank
    #[serde(default = "default_words_per_bank")]
    pub words_per_bank: usize,
}

fn default_runs() -> u32 {
    1
}

fn default_start_run() -> u32 {
    1001
}

fn default_events_per_run() -> u32 {
    100
}

fn default_banks_per_event() -> usize {
    4
}

fn default_words_per_bank() -> usize {
    16
}

impl Default for SyntheticSection {
    fn default() -> Self {
        Self {
            runs: default_runs(),
            start_run: default_start_run(),
            events_per_run: default_events_per_run(),
            banks_per_event: default_banks_per_event(),
            words_per_bank: default_words_per_bank(),
        }
    }
}

impl StationConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: StationConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to
    /// defaults
    pub fn from_env() -> Self {
        let mut config = StationConfig::default();

        if let Ok(name) = std::env::var("EVFLOW_STATION_NAME") {
            config.station.name = name;
        }
        if let Ok(detector) = std::env::var("EVFLOW_DETECTOR") {
            config.station.detector = Some(detector);
        }
        if let Ok(max) = std::env::var("EVFLOW_MAX_RECORDS") {
            if let Ok(m) = max.parse() {
                config.pipeline.max_records = Some(m);
            }
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from
    /// environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }

    /// The core pipeline configuration this station config maps to.
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new(self.source.data_source())
            .with_name(self.station.name.clone())
            .with_target(self.pipeline.target)
            .with_stop_on_errors(self.pipeline.stop_on_errors)
            .with_stop_on_run_boundary(self.pipeline.stop_on_run_boundary)
            .with_queue_timeout(Duration::from_millis(self.pipeline.queue_timeout_ms));
        if let Some(max) = self.pipeline.max_records {
            config = config.with_max_records(max);
        }
        if let Some(detector) = &self.station.detector {
            config = config.with_detector(detector.clone());
        }
        config
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
