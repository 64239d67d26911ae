//! Error types for orchestration.
//!
//! Scheduling recovers locally only from malformed black-list patterns
//! (logged and skipped); every other failure surfaces to the caller through
//! [`OrchestratorError`].

use thiserror::Error;

/// Convenience result type using [`OrchestratorError`].
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors surfaced by the schedule engine, the node executor, and the
/// stream stitcher.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Graph construction or mutation failed.
    #[error(transparent)]
    Dag(#[from] megadag::DagError),

    /// A service with the same name was already registered.
    #[error("service '{0}' already exists")]
    DuplicateService(String),

    /// A graph node has no matching service descriptor.
    #[error("service '{0}' is not registered")]
    UnknownService(String),

    /// A streaming node fans out to more than one downstream service.
    #[error("node '{node}' has {count} downstream nodes, streaming supports at most one")]
    UnsupportedTopology {
        /// The streaming node.
        node: String,
        /// How many downstream nodes it has.
        count: usize,
    },

    /// A node replied with a payload the pipeline cannot consume.
    #[error("unsupported reply from '{node}': {reason}")]
    UnsupportedResponse {
        /// The replying node.
        node: String,
        /// What was wrong with the reply.
        reason: String,
    },

    /// Network or HTTP failure on a node call.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// Reading a streamed response body failed.
    #[error("stream read failure: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing inputs or parsing a reply failed.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A spawned node task panicked or was aborted.
    #[error("node task failed: {0}")]
    Task(String),
}
