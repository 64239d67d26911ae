//! Sentence-buffered stream stitching.
//!
//! The streaming branch of the executor reads the upstream token stream with
//! a blocking HTTP client so chunks can be consumed as they arrive. The
//! whole read/forward loop therefore runs on a blocking worker; events reach
//! the cooperative loop through a bounded channel, which also provides
//! back-pressure against a slow client.
//!
//! With no downstream node the worker passes chunks through untouched,
//! recording token latencies. With a downstream node it assembles
//! sentence-terminated segments and forwards each one as a fresh request, so
//! services that cannot consume mid-sentence fragments (TTS, guardrails)
//! still receive well-formed inputs without breaking the client-facing
//! streaming contract.

use std::io::Read;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;

use crate::config;
use crate::error::{OrchestratorError, Result};
use crate::metrics::{metrics, PendingGuard};
use crate::wire::{self, SENTENCE_ENDS};

/// Channel capacity between the blocking worker and the async stream.
pub(crate) const STREAM_CHANNEL_CAPACITY: usize = 64;

const STREAM_TIMEOUT: Duration = Duration::from_secs(2000);

/// The single node a stream is forwarded through.
pub(crate) struct DownstreamTarget {
    pub name: String,
    pub endpoint: String,
}

/// Everything the blocking worker needs to drive one stream end to end.
pub(crate) struct StitchJob {
    pub node: String,
    pub endpoint: String,
    pub body: serde_json::Map<String, serde_json::Value>,
    pub api_key: Option<String>,
    pub downstream: Option<DownstreamTarget>,
    pub req_start: Instant,
    pub guard: PendingGuard,
}

impl StitchJob {
    /// Entry point on the blocking worker. Errors are forwarded as the final
    /// stream item; the pending guard is released when the job ends, on
    /// every path.
    pub(crate) fn run(self, tx: mpsc::Sender<Result<String>>) {
        if let Err(error) = self.stream(&tx) {
            let _ = tx.blocking_send(Err(error));
        }
        drop(self.guard);
    }

    fn stream(&self, tx: &mpsc::Sender<Result<String>>) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(STREAM_TIMEOUT)
            .no_proxy()
            .build()?;

        let mut request = client.post(&self.endpoint).json(&self.body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let _span = config::telemetry_enabled().then(|| {
            tracing::info_span!("node_stream_generate", node = %self.node).entered()
        });
        let mut response = request.send()?;

        let mut token_start = self.req_start;
        let mut is_first = true;
        let mut buffer = SentenceBuffer::new();
        let mut chunk = [0u8; 8192];

        loop {
            let n = response.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&chunk[..n]).into_owned();

            let Some(target) = &self.downstream else {
                token_start = metrics().token_update(token_start, is_first);
                is_first = false;
                if tx.blocking_send(Ok(text)).is_err() {
                    // client went away
                    return Ok(());
                }
                continue;
            };

            let Some(flush) = buffer.push(&text) else {
                continue;
            };
            if !flush.segment.is_empty() {
                let reply = self.forward(&client, target, &flush.segment)?;
                for token in wire::tokenize(&reply) {
                    token_start = metrics().token_update(token_start, is_first);
                    is_first = false;
                    if tx.blocking_send(Ok(wire::token_frame(token))).is_err() {
                        return Ok(());
                    }
                }
                token_start = Instant::now();
            }
            if flush.is_last && tx.blocking_send(Ok(wire::DONE_EVENT.to_string())).is_err() {
                return Ok(());
            }
        }

        metrics().request_update(self.req_start);
        Ok(())
    }

    /// POST one buffered segment to the downstream node and return its reply
    /// text.
    fn forward(
        &self,
        client: &reqwest::blocking::Client,
        target: &DownstreamTarget,
        segment: &str,
    ) -> Result<String> {
        if config::logflag() {
            tracing::info!(node = %target.name, segment, "forwarding buffered segment");
        }
        let mut request = client
            .post(&target.endpoint)
            .json(&json!({ "text": segment }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let reply: serde_json::Value = request.send()?.json()?;
        match reply.get("text").and_then(|t| t.as_str()) {
            Some(text) => Ok(text.to_string()),
            None => Err(OrchestratorError::UnsupportedResponse {
                node: target.name.clone(),
                reason: "missing 'text' field".to_string(),
            }),
        }
    }
}

/// Accumulates de-framed chunk text until a sentence boundary or the end of
/// the stream.
struct SentenceBuffer {
    buf: String,
}

/// One flush decision: the segment to forward (possibly empty on a bare
/// `[DONE]` chunk) and whether the stream ends here.
struct Flush {
    segment: String,
    is_last: bool,
}

impl SentenceBuffer {
    fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Fold one wire chunk into the buffer; returns a flush when the buffer
    /// ends on a sentence terminator or the chunk closes the stream.
    fn push(&mut self, chunk: &str) -> Option<Flush> {
        self.buf.push_str(wire::extract_chunk_str(chunk));
        let is_last = chunk.ends_with("[DONE]\n\n");
        let at_boundary = self
            .buf
            .chars()
            .last()
            .is_some_and(|c| SENTENCE_ENDS.contains(&c));
        if at_boundary || is_last {
            Some(Flush {
                segment: std::mem::take(&mut self.buf),
                is_last,
            })
        } else {
            None
        }
    }
}
