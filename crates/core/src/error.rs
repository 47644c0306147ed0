//! Error types for the record-conversion pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while converting and routing detector records
#[derive(Debug, Error)]
pub enum Error {
    /// Producer-side transport failure (network receiver gone, queue closed).
    /// Always halts the pipeline regardless of the error policy.
    #[error("Transport failure: {message}")]
    Transport {
        /// What the transport layer reported
        message: String,
    },

    /// A byte buffer that could not be parsed into a structured record
    #[error("Malformed record from {origin} at byte {offset}: {message}")]
    MalformedRecord {
        /// Identity of the source that produced the buffer
        origin: String,
        /// Byte offset at which decoding failed
        offset: usize,
        /// What went wrong
        message: String,
    },

    /// The source violated the data-taking protocol (e.g. event numbers
    /// running backwards within one run)
    #[error("Protocol violation: {message}")]
    Protocol {
        /// Description of the violation
        message: String,
    },

    /// The external event builder failed to produce a domain event
    #[error("Event builder failed: {source}")]
    Builder {
        /// Underlying builder error
        #[source]
        source: anyhow::Error,
    },

    /// A downstream consumer rejected a domain event
    #[error("Consumer '{name}' failed: {source}")]
    Consumer {
        /// Name of the failing consumer
        name: String,
        /// Underlying consumer error
        #[source]
        source: anyhow::Error,
    },

    /// A domain-event collection name was populated twice for one event
    #[error("Collection '{name}' already exists on this event")]
    DuplicateCollection {
        /// The repeated collection name
        name: String,
    },

    /// Pipeline assembly rejected the configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command was issued to a pipeline that has already reached Done
    #[error("Pipeline has terminated")]
    Terminated,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
        }
    }

    /// Whether this error must halt the pipeline even when
    /// `stop_on_errors` is disabled.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
