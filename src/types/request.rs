use serde::{Deserialize, Serialize};

use crate::types::{Mode, Turn};

/// Backend-specific generation options (Ollama's `options` object).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Context window size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,

    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

/// A single-prompt completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model name; required by Ollama, ignored by llama.cpp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// The prompt to continue.
    pub prompt: String,

    /// Whether to stream the response.
    pub stream: bool,

    /// Ask Ollama not to apply its own chat template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<bool>,

    /// Stop sequences the server should truncate on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Backend-specific generation options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerationOptions>,
}

/// A role/content chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model name; required by Ollama, ignored by llama.cpp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// The conversation so far.
    pub messages: Vec<Turn>,

    /// Whether to stream the response.
    pub stream: bool,

    /// Stop sequences the server should truncate on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Backend-specific generation options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerationOptions>,
}

/// A request payload in one of the two supported shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Request {
    /// `{"prompt": ...}`
    Completion(CompletionRequest),

    /// `{"messages": [...]}`
    Chat(ChatRequest),
}

impl Request {
    /// The mode this payload belongs to.
    pub fn mode(&self) -> Mode {
        match self {
            Request::Completion(_) => Mode::Completion,
            Request::Chat(_) => Mode::Chat,
        }
    }

    /// Whether the payload asks for a streamed response.
    pub fn is_streaming(&self) -> bool {
        match self {
            Request::Completion(r) => r.stream,
            Request::Chat(r) => r.stream,
        }
    }

    /// The model named in the payload, if any.
    pub fn model(&self) -> Option<&str> {
        match self {
            Request::Completion(r) => r.model.as_deref(),
            Request::Chat(r) => r.model.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    #[test]
    fn completion_request_omits_unset_fields() {
        let request = Request::Completion(CompletionRequest {
            model: None,
            prompt: "Once upon".to_string(),
            stream: true,
            raw: None,
            stop: None,
            max_tokens: None,
            options: None,
        });
        assert_eq!(
            to_value(&request).unwrap(),
            json!({
                "prompt": "Once upon",
                "stream": true
            })
        );
        assert_eq!(request.mode(), Mode::Completion);
        assert!(request.is_streaming());
    }

    #[test]
    fn chat_request_serialization() {
        let request = Request::Chat(ChatRequest {
            model: Some("qwen3".to_string()),
            messages: vec![Turn::user("hi"), Turn::assistant("")],
            stream: true,
            stop: None,
            max_tokens: None,
            options: Some(GenerationOptions {
                num_ctx: Some(8192),
                num_predict: Some(64),
                stop: Some(vec!["<|rewrite-end|>".to_string()]),
            }),
        });
        assert_eq!(
            to_value(&request).unwrap(),
            json!({
                "model": "qwen3",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": ""}
                ],
                "stream": true,
                "options": {
                    "num_ctx": 8192,
                    "num_predict": 64,
                    "stop": ["<|rewrite-end|>"]
                }
            })
        );
        assert_eq!(request.model(), Some("qwen3"));
    }
}
