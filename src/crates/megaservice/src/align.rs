//! Alignment hooks: customization seams at the input, output, and stream
//! emission boundaries.
//!
//! A deployment shapes prompts, reformats node outputs, or rewrites stream
//! frames by injecting its own closures; the defaults are identity. Hooks
//! receive the runtime graph read-only and must not rely on mutating it.

use std::sync::Arc;

use megadag::Dag;
use serde_json::{Map, Value};

use crate::params::LlmParams;
use crate::response::{EventStream, NodeResponse};

/// Shapes a node's inputs before dispatch.
pub type AlignInputsFn =
    Arc<dyn Fn(Map<String, Value>, &str, &Dag, &LlmParams) -> Map<String, Value> + Send + Sync>;

/// Shapes a node's output before it enters the result table. Receives the
/// inputs the node was called with.
pub type AlignOutputsFn = Arc<
    dyn Fn(NodeResponse, &str, &Map<String, Value>, &Dag, &LlmParams) -> NodeResponse
        + Send
        + Sync,
>;

/// Rewrites the client-facing event stream.
pub type AlignGeneratorFn = Arc<dyn Fn(EventStream) -> EventStream + Send + Sync>;

/// The injected strategy value holding all three hooks.
#[derive(Clone)]
pub struct AlignmentHooks {
    pub align_inputs: AlignInputsFn,
    pub align_outputs: AlignOutputsFn,
    pub align_generator: AlignGeneratorFn,
}

impl Default for AlignmentHooks {
    fn default() -> Self {
        Self {
            align_inputs: Arc::new(|inputs, _, _, _| inputs),
            align_outputs: Arc::new(|data, _, _, _, _| data),
            align_generator: Arc::new(|gen| gen),
        }
    }
}

impl AlignmentHooks {
    /// All-identity hooks.
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn with_align_inputs(
        mut self,
        f: impl Fn(Map<String, Value>, &str, &Dag, &LlmParams) -> Map<String, Value>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.align_inputs = Arc::new(f);
        self
    }

    pub fn with_align_outputs(
        mut self,
        f: impl Fn(NodeResponse, &str, &Map<String, Value>, &Dag, &LlmParams) -> NodeResponse
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.align_outputs = Arc::new(f);
        self
    }

    pub fn with_align_generator(
        mut self,
        f: impl Fn(EventStream) -> EventStream + Send + Sync + 'static,
    ) -> Self {
        self.align_generator = Arc::new(f);
        self
    }
}
