//! Error types for graph construction and mutation.

use thiserror::Error;

/// Convenience result type using [`DagError`].
pub type Result<T> = std::result::Result<T, DagError>;

/// Errors raised by [`Dag`](crate::Dag) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DagError {
    /// An edge endpoint was never added as a node.
    #[error("node '{0}' does not exist")]
    MissingNode(String),

    /// The edge to delete is not present in the graph.
    #[error("edge '{from}' -> '{to}' does not exist")]
    MissingEdge {
        /// Source node of the missing edge.
        from: String,
        /// Target node of the missing edge.
        to: String,
    },

    /// Committing the edge would make the graph cyclic.
    #[error("adding edge '{from}' -> '{to}' would create a cycle")]
    Cycle {
        /// Source node of the rejected edge.
        from: String,
        /// Target node of the rejected edge.
        to: String,
    },
}
