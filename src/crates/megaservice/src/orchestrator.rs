//! The per-request schedule engine and node executor.
//!
//! [`ServiceOrchestrator`] owns the process-lifetime template graph and
//! service registry. Each call to [`schedule`](ServiceOrchestrator::schedule)
//! clones the template into a runtime graph, seeds the root nodes with the
//! caller's inputs, and drives the DAG to completion: as every node
//! finishes, its output is recorded, black-list edits are applied to the
//! runtime graph, and every downstream node whose predecessors are all done
//! is dispatched.
//!
//! Execution is a single cooperative task set fanning out to many concurrent
//! outbound HTTP calls. Streaming nodes hand off to the blocking stream
//! worker in [`stitch`](crate::stitch), which owns the stream until close.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use megadag::Dag;
use regex::Regex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::align::AlignmentHooks;
use crate::config;
use crate::error::{OrchestratorError, Result};
use crate::metrics::PendingGuard;
use crate::params::LlmParams;
use crate::response::{EventStream, NodeResponse};
use crate::service::{ServiceDescriptor, ServiceType};
use crate::stitch::{DownstreamTarget, StitchJob, STREAM_CHANNEL_CAPACITY};
use crate::wire;

/// Completed outputs for one request, keyed by node name.
pub type ResultTable = HashMap<String, NodeResponse>;

/// Key a node uses to veto downstream subtrees for the current request.
const DOWNSTREAM_BLACK_LIST: &str = "downstream_black_list";

/// Session-wide timeout, generous enough for slow LLM completions.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2000);

/// Composes registered microservices into one DAG-shaped pipeline and runs
/// it per request.
#[derive(Default)]
pub struct ServiceOrchestrator {
    services: HashMap<String, ServiceDescriptor>,
    graph: Dag,
    hooks: AlignmentHooks,
}

impl ServiceOrchestrator {
    /// An empty orchestrator with identity alignment hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty orchestrator with the given alignment hooks.
    pub fn with_hooks(hooks: AlignmentHooks) -> Self {
        Self {
            hooks,
            ..Self::default()
        }
    }

    /// Register a service and its graph node.
    pub fn add(&mut self, service: ServiceDescriptor) -> Result<&mut Self> {
        if self.services.contains_key(&service.name) {
            return Err(OrchestratorError::DuplicateService(service.name));
        }
        self.graph.add_node(service.name.clone());
        self.services.insert(service.name.clone(), service);
        Ok(self)
    }

    /// Connect `from`'s output to `to`'s input.
    ///
    /// Returns `false` (after logging) when the edge would create a cycle or
    /// an endpoint is unregistered.
    pub fn flow_to(&mut self, from: &str, to: &str) -> bool {
        match self.graph.add_edge(from, to) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(from, to, %error, "failed to connect services");
                false
            }
        }
    }

    /// The template graph.
    pub fn graph(&self) -> &Dag {
        &self.graph
    }

    /// Run the pipeline for one request.
    ///
    /// Roots receive `initial_inputs` verbatim; every other node receives the
    /// merged structured outputs of its predecessors. Returns the result
    /// table and the runtime graph as mutated by black-list pruning, pruned
    /// to the nodes reachable from the roots.
    ///
    /// A failed node does not cancel its in-flight siblings; their
    /// completions are drained before the first error is returned.
    pub async fn schedule(
        &self,
        initial_inputs: Map<String, Value>,
        llm_params: &LlmParams,
    ) -> Result<(ResultTable, Dag)> {
        let req_start = Instant::now();
        let guard = PendingGuard::acquire();

        if config::logflag() {
            tracing::info!(inputs = ?initial_inputs, "scheduling request");
        }

        let runtime = Arc::new(Mutex::new(self.graph.clone()));
        let roots = self.graph.ind_nodes();

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()?;

        let ctx = ExecContext {
            services: Arc::new(self.services.clone()),
            hooks: self.hooks.clone(),
            client,
            llm_params: Arc::new(llm_params.clone()),
            runtime: Arc::clone(&runtime),
            req_start,
            guard,
        };

        let mut result: ResultTable = HashMap::new();
        let mut pending: JoinSet<(String, Result<NodeResponse>)> = JoinSet::new();
        for root in &roots {
            pending.spawn(execute(ctx.clone(), root.clone(), initial_inputs.clone()));
        }

        let mut first_err: Option<OrchestratorError> = None;
        while let Some(joined) = pending.join_next().await {
            let (node, response) = match joined {
                Ok(completion) => completion,
                Err(error) => {
                    if first_err.is_none() {
                        first_err = Some(OrchestratorError::Task(error.to_string()));
                    }
                    continue;
                }
            };
            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    tracing::error!(node = %node, %error, "node execution failed");
                    if first_err.is_none() {
                        first_err = Some(error);
                    }
                    continue;
                }
            };

            let mut downstreams = lock_dag(&runtime).downstream(&node);

            // black-list pruning, then the uniform-wire-format fallback when
            // pruning cut off every downstream of a would-be streaming reply
            let mut synthesized: Option<String> = None;
            if let NodeResponse::Structured(payload) = &response {
                if let Some(Value::Array(patterns)) = payload.get(DOWNSTREAM_BLACK_LIST) {
                    prune_downstreams(&runtime, &node, patterns, &mut downstreams);
                    if downstreams.is_empty() && llm_params.stream {
                        synthesized = payload
                            .get("text")
                            .and_then(Value::as_str)
                            .map(str::to_string);
                    }
                }
            }
            let response = match synthesized {
                Some(text) => NodeResponse::Stream(synthesized_stream(text)),
                None => response,
            };
            result.insert(node.clone(), response);

            // dispatch every downstream node whose predecessors are all done
            for downstream in &downstreams {
                let ready_inputs = {
                    let graph = lock_dag(&runtime);
                    let predecessors = graph.predecessors(downstream);
                    predecessors
                        .iter()
                        .all(|p| result.contains_key(p))
                        .then(|| Self::process_outputs(&predecessors, &result))
                };
                if let Some(inputs) = ready_inputs {
                    pending.spawn(execute(ctx.clone(), downstream.clone(), inputs));
                }
            }
        }

        let mut final_graph = lock_dag(&runtime).clone();
        let mut keep: HashSet<String> = HashSet::new();
        for root in &roots {
            keep.insert(root.clone());
            keep.extend(final_graph.all_downstreams(root));
        }
        let all_nodes: Vec<String> = final_graph.nodes().map(str::to_string).collect();
        for node in all_nodes {
            if !keep.contains(&node) {
                final_graph.delete_node_if_exists(&node);
            }
        }

        if let Some(error) = first_err {
            return Err(error);
        }
        Ok((result, final_graph))
    }

    /// Shallow-merge the structured outputs of `prev_nodes` into one input
    /// mapping, in predecessor order; on key collisions the last writer
    /// wins. Non-structured outputs are skipped.
    pub fn process_outputs(prev_nodes: &[String], result: &ResultTable) -> Map<String, Value> {
        let mut merged = Map::new();
        for prev in prev_nodes {
            match result.get(prev) {
                Some(NodeResponse::Structured(payload)) => {
                    for (key, value) in payload {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                Some(_) => {
                    tracing::warn!(node = %prev, "predecessor output is not structured, skipping merge");
                }
                None => {}
            }
        }
        merged
    }

    /// Outputs of the runtime graph's leaves, the final products of the
    /// request.
    pub fn get_all_final_outputs<'a>(
        result: &'a ResultTable,
        runtime_graph: &Dag,
    ) -> HashMap<String, &'a NodeResponse> {
        runtime_graph
            .all_leaves()
            .into_iter()
            .filter_map(|leaf| result.get(&leaf).map(|response| (leaf, response)))
            .collect()
    }
}

/// Shared, owned context cloned into every spawned node task.
#[derive(Clone)]
struct ExecContext {
    services: Arc<HashMap<String, ServiceDescriptor>>,
    hooks: AlignmentHooks,
    client: reqwest::Client,
    llm_params: Arc<LlmParams>,
    runtime: Arc<Mutex<Dag>>,
    req_start: Instant,
    guard: PendingGuard,
}

fn lock_dag(dag: &Mutex<Dag>) -> MutexGuard<'_, Dag> {
    dag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Delete every runtime edge out of `node` whose target matches a black-list
/// pattern, and drop the target from the local downstream view. Malformed
/// patterns are logged and skipped.
fn prune_downstreams(
    runtime: &Mutex<Dag>,
    node: &str,
    patterns: &[Value],
    downstreams: &mut Vec<String>,
) {
    let mut graph = lock_dag(runtime);
    for pattern in patterns {
        let Some(pattern) = pattern.as_str() else {
            tracing::error!(node, "non-string black-list pattern, skipping");
            continue;
        };
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(error) => {
                tracing::error!(node, pattern, %error, "invalid black-list pattern, skipping");
                continue;
            }
        };
        downstreams.retain(|downstream| {
            if !re.is_match(downstream) {
                return true;
            }
            if config::logflag() {
                tracing::info!(node, downstream = %downstream, "skip forwarding");
            }
            if let Err(error) = graph.delete_edge(node, downstream) {
                tracing::warn!(node, downstream = %downstream, %error, "black-list edge already gone");
            }
            false
        });
    }
}

/// Two-event stream standing in for a structured reply, keeping the client
/// wire format uniform when the caller asked for a stream.
fn synthesized_stream(text: String) -> EventStream {
    Box::pin(async_stream::stream! {
        yield Ok::<String, OrchestratorError>(format!("data: b'{text}'\n\n"));
        yield Ok(wire::DONE_EVENT.to_string());
    })
}

/// Drive one node to completion. Never panics outward: the node name rides
/// along so the engine can attribute failures.
async fn execute(
    ctx: ExecContext,
    node: String,
    inputs: Map<String, Value>,
) -> (String, Result<NodeResponse>) {
    match execute_inner(ctx, node.clone(), inputs).await {
        Ok((response, effective_node)) => (effective_node, Ok(response)),
        Err(error) => (node, Err(error)),
    }
}

async fn execute_inner(
    ctx: ExecContext,
    node: String,
    mut inputs: Map<String, Value>,
) -> Result<(NodeResponse, String)> {
    let service = ctx
        .services
        .get(&node)
        .ok_or_else(|| OrchestratorError::UnknownService(node.clone()))?;

    let is_generation = matches!(service.service_type, ServiceType::Llm | ServiceType::Lvm);
    if is_generation {
        ctx.llm_params.overlay(&mut inputs)?;
    }

    let inputs = {
        let graph = lock_dag(&ctx.runtime);
        (ctx.hooks.align_inputs)(inputs, &node, &graph, &ctx.llm_params)
    };

    // bearer-credential services resolve their endpoint with the request's
    // model input
    let endpoint = if service.api_key().is_some() {
        service.endpoint_path(inputs.get("model").and_then(Value::as_str))
    } else {
        service.endpoint_path(None)
    };

    if config::logflag() {
        tracing::info!(node = %node, inputs = ?inputs, "dispatching node");
    }

    if is_generation && ctx.llm_params.stream {
        execute_streaming(ctx, node, inputs, endpoint).await
    } else {
        execute_unary(ctx, node, inputs, endpoint).await
    }
}

/// Streaming path: hand the upstream byte stream to the blocking stitch
/// worker and expose its events as the node's response.
///
/// The stream is forwarded through at most one downstream node; the returned
/// effective node is that downstream (the stream stands as *its* output) or
/// the current node when there is none.
async fn execute_streaming(
    ctx: ExecContext,
    node: String,
    inputs: Map<String, Value>,
    endpoint: String,
) -> Result<(NodeResponse, String)> {
    let service = ctx
        .services
        .get(&node)
        .ok_or_else(|| OrchestratorError::UnknownService(node.clone()))?;

    let downstreams = lock_dag(&ctx.runtime).downstream(&node);
    if downstreams.len() > 1 {
        return Err(OrchestratorError::UnsupportedTopology {
            node,
            count: downstreams.len(),
        });
    }
    let downstream = match downstreams.first() {
        Some(name) => {
            let target = ctx
                .services
                .get(name)
                .ok_or_else(|| OrchestratorError::UnknownService(name.clone()))?;
            Some(DownstreamTarget {
                name: name.clone(),
                endpoint: target.endpoint_path(None),
            })
        }
        None => None,
    };
    let effective_node = downstream
        .as_ref()
        .map(|target| target.name.clone())
        .unwrap_or_else(|| node.clone());

    let job = StitchJob {
        node,
        endpoint,
        body: inputs,
        api_key: service.api_key().map(str::to_string),
        downstream,
        req_start: ctx.req_start,
        guard: ctx.guard.clone(),
    };
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::task::spawn_blocking(move || job.run(tx));

    let stream: EventStream = Box::pin(ReceiverStream::new(rx));
    let stream = (ctx.hooks.align_generator)(stream);
    Ok((NodeResponse::Stream(stream), effective_node))
}

/// Unary path: async JSON POST, tagged by reply content type.
async fn execute_unary(
    ctx: ExecContext,
    node: String,
    inputs: Map<String, Value>,
    endpoint: String,
) -> Result<(NodeResponse, String)> {
    let service = ctx
        .services
        .get(&node)
        .ok_or_else(|| OrchestratorError::UnknownService(node.clone()))?;

    let span = if config::telemetry_enabled() {
        tracing::info_span!("node_generate", node = %node)
    } else {
        tracing::Span::none()
    };
    let mut request = ctx.client.post(&endpoint).json(&inputs);
    if let Some(key) = service.api_key() {
        request = request.bearer_auth(key);
    }
    let response = request.send().instrument(span).await?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let data = if content_type.starts_with("audio/wav") {
        NodeResponse::Audio {
            content_type,
            data: response.bytes().await?.to_vec(),
        }
    } else {
        match response.json::<Value>().await? {
            Value::Object(payload) => NodeResponse::Structured(payload),
            _ => {
                return Err(OrchestratorError::UnsupportedResponse {
                    node,
                    reason: "expected a JSON object".to_string(),
                })
            }
        }
    };

    let aligned = {
        let graph = lock_dag(&ctx.runtime);
        (ctx.hooks.align_outputs)(data, &node, &inputs, &graph, &ctx.llm_params)
    };
    Ok((aligned, node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn table_with(entries: Vec<(&str, Value)>) -> ResultTable {
        entries
            .into_iter()
            .map(|(name, value)| {
                let Value::Object(payload) = value else {
                    panic!("structured payloads only");
                };
                (name.to_string(), NodeResponse::Structured(payload))
            })
            .collect()
    }

    #[test]
    fn process_outputs_merges_in_predecessor_order() {
        let result = table_with(vec![
            ("a", json!({"x": 1, "shared": "from-a"})),
            ("b", json!({"y": 2, "shared": "from-b"})),
        ]);
        let merged = ServiceOrchestrator::process_outputs(
            &["a".to_string(), "b".to_string()],
            &result,
        );
        assert_eq!(merged["x"], json!(1));
        assert_eq!(merged["y"], json!(2));
        // last writer wins
        assert_eq!(merged["shared"], json!("from-b"));
    }

    #[test]
    fn process_outputs_skips_non_structured_predecessors() {
        let mut result = table_with(vec![("a", json!({"x": 1}))]);
        result.insert(
            "audio".to_string(),
            NodeResponse::Audio {
                content_type: "audio/wav".to_string(),
                data: vec![0, 1],
            },
        );
        let merged = ServiceOrchestrator::process_outputs(
            &["a".to_string(), "audio".to_string()],
            &result,
        );
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn prune_is_deterministic_and_skips_bad_patterns() {
        let mut dag = Dag::new();
        for node in ["guard", "x", "y"] {
            dag.add_node(node);
        }
        dag.add_edge("guard", "x").unwrap();
        dag.add_edge("guard", "y").unwrap();
        let runtime = Mutex::new(dag);

        let mut downstreams = vec!["x".to_string(), "y".to_string()];
        let patterns = vec![json!("("), json!(42), json!("x")];
        prune_downstreams(&runtime, "guard", &patterns, &mut downstreams);

        assert_eq!(downstreams, vec!["y"]);
        let graph = runtime.lock().unwrap();
        assert_eq!(graph.downstream("guard"), vec!["y"]);
    }

    #[tokio::test]
    async fn synthesized_stream_emits_text_then_done() {
        let mut stream = synthesized_stream("ok".to_string());
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }
        assert_eq!(events, vec!["data: b'ok'\n\n", "data: [DONE]\n\n"]);
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let mut orchestrator = ServiceOrchestrator::new();
        let service =
            ServiceDescriptor::new("emb", ServiceType::Embedding, "localhost", 6000, "/v1/emb");
        orchestrator.add(service.clone()).unwrap();
        assert!(matches!(
            orchestrator.add(service),
            Err(OrchestratorError::DuplicateService(_))
        ));
    }

    #[test]
    fn flow_to_reports_cycles_as_false() {
        let mut orchestrator = ServiceOrchestrator::new();
        for name in ["a", "b"] {
            orchestrator
                .add(ServiceDescriptor::new(
                    name,
                    ServiceType::Undefined,
                    "localhost",
                    6000,
                    "/v1",
                ))
                .unwrap();
        }
        assert!(orchestrator.flow_to("a", "b"));
        assert!(!orchestrator.flow_to("b", "a"));
        assert!(!orchestrator.flow_to("a", "ghost"));
        assert_eq!(orchestrator.graph().downstream("a"), vec!["b"]);
    }
}
