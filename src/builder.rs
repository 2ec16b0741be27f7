//! Request construction.
//!
//! Turns a parsed conversation (or raw text) into the payload for one of the
//! supported endpoints.  Chat-template boundary tokens are applied here, never
//! by the markup parser, so the same turn list can feed either a chat endpoint
//! or a bare completion endpoint.

use crate::error::{Error, Result};
use crate::types::{
    Backend, ChatRequest, CompletionRequest, GenerationOptions, Mode, Request, Role, Turn,
};

/// Context size requested from Ollama, which otherwise defaults to a small window.
pub const OLLAMA_NUM_CTX: u32 = 8192;

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// How turns are flattened into a single completion prompt.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|im_start|>role\ncontent<|im_end|>\n` per turn, trailing assistant left open.
    #[default]
    ChatMl,

    /// Turn contents concatenated with no boundary tokens.
    Plain,
}

impl std::fmt::Display for ChatTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatTemplate::ChatMl => write!(f, "chatml"),
            ChatTemplate::Plain => write!(f, "plain"),
        }
    }
}

impl std::str::FromStr for ChatTemplate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chatml" => Ok(ChatTemplate::ChatMl),
            "plain" | "none" => Ok(ChatTemplate::Plain),
            _ => Err(format!(
                "Invalid template: {}. Valid options: chatml, plain",
                s
            )),
        }
    }
}

/// What the request is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestInput {
    /// A parsed conversation.
    Turns(Vec<Turn>),

    /// Text sent without any markup interpretation.
    Raw(String),
}

/// Options that shape the request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Server family.
    pub backend: Backend,

    /// Completion or chat payload.
    pub mode: Mode,

    /// Model name (required by Ollama).
    pub model: Option<String>,

    /// Whether to ask for a streamed response.
    pub stream: bool,

    /// Response length cap; `None` or `Some(0)` leaves the provider default.
    pub max_tokens: Option<u32>,

    /// Stop markers passed to the server as a hint.
    pub stop: Vec<String>,

    /// Template for flattening turns in completion mode.
    pub template: ChatTemplate,
}

impl RequestOptions {
    /// Streaming options for `backend` in `mode`.
    pub fn new(backend: Backend, mode: Mode) -> Self {
        Self {
            backend,
            mode,
            model: None,
            stream: true,
            max_tokens: None,
            stop: Vec::new(),
            template: ChatTemplate::default(),
        }
    }

    /// Sets the model name.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Sets whether the response is streamed.
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Sets the response length cap.
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the stop markers.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    /// Sets the completion template.
    pub fn with_template(mut self, template: ChatTemplate) -> Self {
        self.template = template;
        self
    }
}

/// Flatten `turns` into one prompt string using `template`.
///
/// With [`ChatTemplate::ChatMl`] every turn is closed except a trailing
/// assistant turn, which is left open so the model continues it.  If the last
/// turn is not an assistant turn an empty one is opened.
pub fn render_prompt(turns: &[Turn], template: ChatTemplate) -> String {
    match template {
        ChatTemplate::Plain => turns.iter().map(|t| t.content.as_str()).collect(),
        ChatTemplate::ChatMl => {
            let mut prompt = String::new();
            let (open, closed) = match turns.split_last() {
                Some((last, rest)) if last.role == Role::Assistant => (Some(last), rest),
                _ => (None, turns),
            };
            for turn in closed {
                prompt.push_str(IM_START);
                prompt.push_str(turn.role.as_str());
                prompt.push('\n');
                prompt.push_str(&turn.content);
                prompt.push_str(IM_END);
                prompt.push('\n');
            }
            prompt.push_str(IM_START);
            prompt.push_str(Role::Assistant.as_str());
            prompt.push('\n');
            if let Some(open) = open {
                prompt.push_str(&open.content);
            }
            prompt
        }
    }
}

/// Build the request payload for `input`.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] when the options cannot describe a valid
/// request: streaming turned off, Ollama without a model, or an empty stop
/// marker.
pub fn build(input: RequestInput, options: &RequestOptions) -> Result<Request> {
    if !options.stream {
        return Err(Error::invalid_config(
            "responses are always streamed",
            Some("stream".to_string()),
        ));
    }
    if options.backend == Backend::Ollama && options.model.as_deref().is_none_or(str::is_empty) {
        return Err(Error::invalid_config(
            "the ollama backend requires a model name",
            Some("model".to_string()),
        ));
    }
    if options.stop.iter().any(String::is_empty) {
        return Err(Error::invalid_config(
            "stop markers must not be empty",
            Some("stop".to_string()),
        ));
    }

    let max_tokens = options.max_tokens.filter(|n| *n > 0);
    let stop = if options.stop.is_empty() {
        None
    } else {
        Some(options.stop.clone())
    };
    let (top_stop, top_max_tokens, generation) = match options.backend {
        Backend::LlamaCpp => (stop, max_tokens, None),
        Backend::Ollama => (
            None,
            None,
            Some(GenerationOptions {
                num_ctx: Some(OLLAMA_NUM_CTX),
                num_predict: max_tokens,
                stop,
            }),
        ),
    };

    let request = match options.mode {
        Mode::Completion => {
            let (prompt, templated) = match input {
                RequestInput::Raw(text) => (text, false),
                RequestInput::Turns(turns) => (render_prompt(&turns, options.template), true),
            };
            let raw = (options.backend == Backend::Ollama && templated).then_some(true);
            Request::Completion(CompletionRequest {
                model: options.model.clone(),
                prompt,
                stream: options.stream,
                raw,
                stop: top_stop,
                max_tokens: top_max_tokens,
                options: generation,
            })
        }
        Mode::Chat => {
            let messages = match input {
                RequestInput::Raw(text) => vec![Turn::user(text)],
                RequestInput::Turns(turns) => turns,
            };
            Request::Chat(ChatRequest {
                model: options.model.clone(),
                messages,
                stream: options.stream,
                stop: top_stop,
                max_tokens: top_max_tokens,
                options: generation,
            })
        }
    };
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_value};

    fn conversation() -> Vec<Turn> {
        vec![
            Turn::system("You are a helpful assistant"),
            Turn::user("who is Marisa"),
            Turn::assistant(""),
        ]
    }

    #[test]
    fn llama_chat_request() {
        let options = RequestOptions::new(Backend::LlamaCpp, Mode::Chat)
            .with_stop(vec!["<|rewrite-end|>".to_string()])
            .with_max_tokens(Some(64));
        let request = build(RequestInput::Turns(conversation()), &options).unwrap();
        assert_eq!(
            to_value(&request).unwrap(),
            json!({
                "messages": [
                    {"role": "system", "content": "You are a helpful assistant"},
                    {"role": "user", "content": "who is Marisa"},
                    {"role": "assistant", "content": ""}
                ],
                "stream": true,
                "stop": ["<|rewrite-end|>"],
                "max_tokens": 64
            })
        );
    }

    #[test]
    fn zero_max_tokens_means_provider_default() {
        let options = RequestOptions::new(Backend::LlamaCpp, Mode::Completion)
            .with_max_tokens(Some(0));
        let request = build(RequestInput::Raw("Once".to_string()), &options).unwrap();
        assert_eq!(
            to_value(&request).unwrap(),
            json!({"prompt": "Once", "stream": true})
        );
    }

    #[test]
    fn ollama_puts_limits_in_options() {
        let options = RequestOptions::new(Backend::Ollama, Mode::Chat)
            .with_model(Some("qwen3".to_string()))
            .with_max_tokens(Some(128))
            .with_stop(vec!["END".to_string()]);
        let request = build(RequestInput::Raw("hi".to_string()), &options).unwrap();
        assert_eq!(
            to_value(&request).unwrap(),
            json!({
                "model": "qwen3",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true,
                "options": {"num_ctx": 8192, "num_predict": 128, "stop": ["END"]}
            })
        );
    }

    #[test]
    fn ollama_requires_model() {
        let options = RequestOptions::new(Backend::Ollama, Mode::Chat);
        let err = build(RequestInput::Raw("hi".to_string()), &options).unwrap_err();
        assert!(err.is_invalid_config());

        let options = options.with_model(Some(String::new()));
        assert!(build(RequestInput::Raw("hi".to_string()), &options).is_err());
    }

    #[test]
    fn empty_stop_marker_is_rejected() {
        let options =
            RequestOptions::new(Backend::LlamaCpp, Mode::Chat).with_stop(vec![String::new()]);
        let err = build(RequestInput::Raw("hi".to_string()), &options).unwrap_err();
        assert!(err.is_invalid_config());
    }

    #[test]
    fn non_streaming_is_rejected() {
        let options = RequestOptions::new(Backend::LlamaCpp, Mode::Completion).with_stream(false);
        let err = build(RequestInput::Raw("hi".to_string()), &options).unwrap_err();
        assert!(err.is_invalid_config());
        assert!(err.to_string().contains("(option: stream)"));
    }

    #[test]
    fn chatml_leaves_assistant_open() {
        let prompt = render_prompt(&conversation(), ChatTemplate::ChatMl);
        assert_eq!(
            prompt,
            "<|im_start|>system\nYou are a helpful assistant<|im_end|>\n\
             <|im_start|>user\nwho is Marisa<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn chatml_opens_assistant_when_missing() {
        let prompt = render_prompt(&[Turn::user("hi")], ChatTemplate::ChatMl);
        assert_eq!(
            prompt,
            "<|im_start|>user\nhi<|im_end|>\n<|im_start|>assistant\n"
        );
    }

    #[test]
    fn plain_template_concatenates() {
        let turns = vec![Turn::user("a\n"), Turn::assistant("b")];
        assert_eq!(render_prompt(&turns, ChatTemplate::Plain), "a\nb");
    }

    #[test]
    fn ollama_templated_completion_is_raw() {
        let options = RequestOptions::new(Backend::Ollama, Mode::Completion)
            .with_model(Some("qwen3".to_string()));
        let request = build(RequestInput::Turns(conversation()), &options).unwrap();
        let Request::Completion(completion) = request else {
            panic!("expected a completion request");
        };
        assert_eq!(completion.raw, Some(true));
        assert!(completion.prompt.ends_with("<|im_start|>assistant\n"));

        let request = build(RequestInput::Raw("Once".to_string()), &options).unwrap();
        let Request::Completion(completion) = request else {
            panic!("expected a completion request");
        };
        assert_eq!(completion.raw, None);
    }

    #[test]
    fn parse_template() {
        assert_eq!("ChatML".parse::<ChatTemplate>().unwrap(), ChatTemplate::ChatMl);
        assert_eq!("plain".parse::<ChatTemplate>().unwrap(), ChatTemplate::Plain);
        assert!("jinja".parse::<ChatTemplate>().is_err());
    }
}
