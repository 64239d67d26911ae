//! Service descriptors for pipeline nodes.
//!
//! A descriptor maps a graph node to the remote microservice backing it:
//! where to POST, what kind of service it is, and the optional bearer
//! credential the call carries. Descriptors are immutable for the process
//! lifetime once registered.

use serde::{Deserialize, Serialize};

/// What a remote service does in the pipeline.
///
/// The executor only branches on [`Llm`](ServiceType::Llm) and
/// [`Lvm`](ServiceType::Lvm) (parameter overlay and the streaming path);
/// the rest classify services for configuration and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Gateway,
    Embedding,
    Retriever,
    Rerank,
    Llm,
    Lvm,
    Guardrail,
    Asr,
    Tts,
    Dataprep,
    Undefined,
}

/// Immutable description of one remote microservice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Node name, unique within the orchestrator.
    pub name: String,
    /// Role of the service in the pipeline.
    pub service_type: ServiceType,
    scheme: String,
    host: String,
    port: u16,
    path: String,
    api_key: Option<String>,
}

impl ServiceDescriptor {
    /// Create a descriptor POSTing to `http://{host}:{port}{path}`.
    pub fn new(
        name: impl Into<String>,
        service_type: ServiceType,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service_type,
            scheme: "http".to_string(),
            host: host.into(),
            port,
            path: path.into(),
            api_key: None,
        }
    }

    /// Override the URL scheme (default `http`).
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Attach a bearer credential. Calls to this service then carry an
    /// `Authorization: Bearer` header, and the endpoint is resolved with the
    /// request's `model` input.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// The bearer credential, when configured.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Full URL for the remote call.
    ///
    /// When `model` is given, a `{model}` placeholder in the path is
    /// substituted; descriptors without the placeholder ignore it.
    pub fn endpoint_path(&self, model: Option<&str>) -> String {
        let path = match model {
            Some(model) if self.path.contains("{model}") => self.path.replace("{model}", model),
            _ => self.path.clone(),
        };
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
    }
}
