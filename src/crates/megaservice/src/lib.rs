//! # megaservice - compose microservices into one pipeline
//!
//! A megaservice drives a DAG of remote microservices (embedder, retriever,
//! reranker, generator, guardrail, speech services) to serve one end-user
//! request. Given the caller's inputs, the orchestrator POSTs to every ready
//! node, feeds each node's output to its downstream nodes as soon as all
//! predecessors are done, and produces either a structured result table or a
//! token-by-token event stream.
//!
//! ## Core pieces
//!
//! - [`ServiceOrchestrator`] — the per-request schedule engine and node
//!   executor
//! - [`Dag`] — the graph model (re-exported from `megadag`)
//! - [`ServiceDescriptor`] / [`ServiceType`] — remote-service registry
//!   entries
//! - [`LlmParams`] — decoding options overlaid onto generation nodes
//! - [`AlignmentHooks`] — input/output/stream customization seams
//! - [`metrics()`] — Prometheus latency histograms and the pending-request
//!   gauge
//! - [`wire`] — the client-facing streaming wire format
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use megaservice::{LlmParams, ServiceDescriptor, ServiceOrchestrator, ServiceType};
//! use serde_json::{json, Map, Value};
//!
//! let mut megaservice = ServiceOrchestrator::new();
//! megaservice.add(ServiceDescriptor::new(
//!     "embedding", ServiceType::Embedding, "embedding-svc", 6000, "/v1/embeddings",
//! ))?;
//! megaservice.add(ServiceDescriptor::new(
//!     "llm", ServiceType::Llm, "llm-svc", 9000, "/v1/chat/completions",
//! ))?;
//! megaservice.flow_to("embedding", "llm");
//!
//! let mut inputs = Map::new();
//! inputs.insert("text".to_string(), json!("What is a megaservice?"));
//! let (result, runtime_graph) =
//!     megaservice.schedule(inputs, &LlmParams::default()).await?;
//! # Ok::<(), megaservice::OrchestratorError>(())
//! ```
//!
//! Nodes can veto downstream subtrees at runtime by including a
//! `downstream_black_list` field (a list of regexes over node names) in
//! their structured reply; matching edges are removed from the per-request
//! runtime graph before downstream dispatch.

pub mod align;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod params;
pub mod response;
pub mod service;
mod stitch;
pub mod wire;

pub use align::AlignmentHooks;
pub use error::{OrchestratorError, Result};
pub use megadag::{Dag, DagError};
pub use metrics::{metrics, OrchestratorMetrics, PendingGuard};
pub use orchestrator::{ResultTable, ServiceOrchestrator};
pub use params::LlmParams;
pub use response::{EventStream, NodeResponse};
pub use service::{ServiceDescriptor, ServiceType};
