//! Node payload variants flowing through the result table.

use std::fmt;
use std::pin::Pin;

use futures::Stream;
use serde_json::{Map, Value};

use crate::error::OrchestratorError;

/// Stream of client-facing wire events (`data: ...\n\n` frames).
///
/// A mid-stream failure surfaces as an `Err` item; the stream ends after it.
pub type EventStream =
    Pin<Box<dyn Stream<Item = std::result::Result<String, OrchestratorError>> + Send>>;

/// Completed output of one node.
///
/// The schedule engine routes on the variant tag: only [`Structured`]
/// payloads participate in black-list pruning and downstream input merging,
/// and a [`Stream`] only ever appears at the terminal leaf of a streaming
/// pipeline.
///
/// [`Structured`]: NodeResponse::Structured
/// [`Stream`]: NodeResponse::Stream
pub enum NodeResponse {
    /// Structured JSON payload.
    Structured(Map<String, Value>),
    /// Raw audio bytes, tagged with the response content type.
    Audio {
        content_type: String,
        data: Vec<u8>,
    },
    /// Open token stream.
    Stream(EventStream),
}

impl NodeResponse {
    /// The structured payload, if this is one.
    pub fn as_structured(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Structured(payload) => Some(payload),
            _ => None,
        }
    }

    /// Consume the response, returning the stream if this is one.
    pub fn into_stream(self) -> Option<EventStream> {
        match self {
            Self::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// Whether this is an open stream.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl fmt::Debug for NodeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured(payload) => f.debug_tuple("Structured").field(payload).finish(),
            Self::Audio { content_type, data } => f
                .debug_struct("Audio")
                .field("content_type", content_type)
                .field("len", &data.len())
                .finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}
