use serde::{Deserialize, Serialize};

/// The inference server family a request is sent to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A llama.cpp `llama-server`.
    #[default]
    LlamaCpp,

    /// An Ollama daemon.
    Ollama,
}

impl Backend {
    /// The localhost port the server listens on out of the box.
    pub fn default_port(&self) -> u16 {
        match self {
            Backend::LlamaCpp => 10000,
            Backend::Ollama => 11434,
        }
    }

    /// The environment variable that overrides the localhost port.
    pub fn port_env(&self) -> &'static str {
        match self {
            Backend::LlamaCpp => "LLAMA_CPP_PORT",
            Backend::Ollama => "OLLAMA_PORT",
        }
    }

    /// The endpoint path, relative to the base URL, for the given mode.
    pub fn endpoint(&self, mode: Mode) -> &'static str {
        match (self, mode) {
            (Backend::LlamaCpp, Mode::Completion) => "completion",
            (Backend::LlamaCpp, Mode::Chat) => "v1/chat/completions",
            (Backend::Ollama, Mode::Completion) => "api/generate",
            (Backend::Ollama, Mode::Chat) => "api/chat",
        }
    }

    /// The wire dialect spoken by the endpoint for the given mode.
    pub fn dialect(&self, mode: Mode) -> Dialect {
        match (self, mode) {
            (Backend::LlamaCpp, Mode::Completion) => Dialect::LlamaCompletion,
            (Backend::LlamaCpp, Mode::Chat) => Dialect::OpenAiChat,
            (Backend::Ollama, Mode::Completion) => Dialect::OllamaGenerate,
            (Backend::Ollama, Mode::Chat) => Dialect::OllamaChat,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::LlamaCpp => write!(f, "llama"),
            Backend::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    /// Accepts "llama", "llama.cpp", "llamacpp" or "ollama" (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "llama" | "llama.cpp" | "llamacpp" => Ok(Backend::LlamaCpp),
            "ollama" => Ok(Backend::Ollama),
            _ => Err(format!(
                "Invalid backend: {}. Valid options: llama, ollama",
                s
            )),
        }
    }
}

/// The shape of the request payload.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// A single prompt string continued by the model.
    #[serde(rename = "raw")]
    Completion,

    /// A list of role/content messages.
    #[default]
    Chat,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Completion => write!(f, "raw"),
            Mode::Chat => write!(f, "chat"),
        }
    }
}

/// Where a streamed event carries its content delta.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// llama.cpp `/completion`: `{"content": "...", "stop": false}`.
    LlamaCompletion,

    /// OpenAI-compatible chat: `{"choices": [{"delta": {"content": "..."}}]}`.
    OpenAiChat,

    /// Ollama `/api/generate`: `{"response": "...", "done": false}`.
    OllamaGenerate,

    /// Ollama `/api/chat`: `{"message": {"content": "..."}, "done": false}`.
    OllamaChat,
}
