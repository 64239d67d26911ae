//! Decoding parameters forwarded to generation nodes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Configuration bundle for LLM/LVM nodes.
///
/// The recognized fields are overlaid onto a generation node's inputs before
/// dispatch: a field whose value disagrees with the inputs is replaced, other
/// input keys are preserved. Non-generation nodes never see these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmParams {
    /// Model identifier; selects the endpoint variant for services carrying
    /// a bearer credential. Omitted from the overlay when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub max_new_tokens: u32,
    pub top_k: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub repetition_penalty: f64,
    /// When true and the node is LLM/LVM, the executor takes the streaming
    /// path and the client receives a token stream.
    pub stream: bool,
}

impl Default for LlmParams {
    fn default() -> Self {
        Self {
            model: None,
            max_new_tokens: 1024,
            top_k: 10,
            top_p: 0.95,
            temperature: 0.01,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            repetition_penalty: 1.03,
            stream: true,
        }
    }
}

impl LlmParams {
    /// Overlay the recognized fields onto `inputs`, replacing disagreeing
    /// values and leaving unrelated keys alone.
    pub(crate) fn overlay(&self, inputs: &mut Map<String, Value>) -> Result<()> {
        if let Value::Object(fields) = serde_json::to_value(self)? {
            for (field, value) in fields {
                if inputs.get(&field) != Some(&value) {
                    inputs.insert(field, value);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_service_conventions() {
        let params = LlmParams::default();
        assert_eq!(params.max_new_tokens, 1024);
        assert_eq!(params.top_k, 10);
        assert!(params.stream);
        assert!(params.model.is_none());
    }

    #[test]
    fn overlay_replaces_disagreeing_fields_and_keeps_others() {
        let params = LlmParams {
            temperature: 0.7,
            stream: false,
            ..LlmParams::default()
        };
        let mut inputs = Map::new();
        inputs.insert("query".to_string(), json!("hello"));
        inputs.insert("temperature".to_string(), json!(0.01));

        params.overlay(&mut inputs).unwrap();

        assert_eq!(inputs["query"], json!("hello"));
        assert_eq!(inputs["temperature"], json!(0.7));
        assert_eq!(inputs["stream"], json!(false));
        assert_eq!(inputs["max_new_tokens"], json!(1024));
    }

    #[test]
    fn overlay_omits_unset_model() {
        let params = LlmParams::default();
        let mut inputs = Map::new();
        params.overlay(&mut inputs).unwrap();
        assert!(!inputs.contains_key("model"));

        let params = LlmParams {
            model: Some("mixtral".to_string()),
            ..LlmParams::default()
        };
        params.overlay(&mut inputs).unwrap();
        assert_eq!(inputs["model"], json!("mixtral"));
    }
}
