//! # megadag - DAG model for megaservice pipelines
//!
//! A megaservice pipeline is a directed acyclic graph of named remote
//! services. This crate provides the graph model the orchestrator builds at
//! configuration time and mutates per request: idempotent node insertion,
//! cycle-rejecting edge insertion, predecessor/successor queries, and node
//! and edge deletion.
//!
//! The model layer is deliberately free of I/O and async machinery; the
//! orchestrator clones a template [`Dag`] at the start of every request and
//! mutates the clone, so the template is never touched.
//!
//! ```rust
//! use megadag::Dag;
//!
//! let mut dag = Dag::new();
//! dag.add_node("embedding");
//! dag.add_node("retriever");
//! dag.add_edge("embedding", "retriever")?;
//!
//! assert_eq!(dag.ind_nodes(), vec!["embedding"]);
//! assert_eq!(dag.all_leaves(), vec!["retriever"]);
//! # Ok::<(), megadag::DagError>(())
//! ```

pub mod error;
pub mod graph;

pub use error::{DagError, Result};
pub use graph::Dag;
