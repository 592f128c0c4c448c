//! Error types for tutorflow.

use thiserror::Error;

/// Result type for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Error types that can occur while assembling or running a flow.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Context manipulation error.
    #[error("Context error: {0}")]
    Context(String),

    /// Flow construction error.
    #[error("Construction error: {0}")]
    Construction(String),

    /// A second successor was registered for an already wired label.
    #[error("Node '{node}' already has a successor for action '{action}'")]
    DuplicateTransition {
        /// Source node name
        node: String,
        /// Outcome label
        action: String,
    },

    /// The prepare phase failed. Never retried.
    #[error("Prepare failed in node '{node}': {source}")]
    Prepare {
        node: String,
        #[source]
        source: Box<FlowError>,
    },

    /// Every execute attempt failed and the fallback declined to recover.
    #[error("Node '{node}' failed after {attempts} attempt(s): {source}")]
    Exhausted {
        node: String,
        attempts: usize,
        #[source]
        source: Box<FlowError>,
    },

    /// The finalize phase failed.
    #[error("Finalize failed in node '{node}': {source}")]
    Finalize {
        node: String,
        #[source]
        source: Box<FlowError>,
    },

    /// The optional visit limit was hit.
    #[error("Flow exceeded maximum steps ({0})")]
    MaxStepsExceeded(usize),

    /// Execution error raised by node code.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Serialization/Deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("Error: {0}")]
    Generic(#[from] eyre::Report),
}

impl FlowError {
    /// Create a new context error.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::Context(msg.into())
    }

    /// Create a new construction error.
    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub(crate) fn prepare(node: impl Into<String>, source: FlowError) -> Self {
        Self::Prepare {
            node: node.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn exhausted(node: impl Into<String>, attempts: usize, source: FlowError) -> Self {
        Self::Exhausted {
            node: node.into(),
            attempts,
            source: Box::new(source),
        }
    }

    pub(crate) fn finalize(node: impl Into<String>, source: FlowError) -> Self {
        Self::Finalize {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Returns true if this error came out of the retry loop.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}
