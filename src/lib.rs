//! Stream a response from a local llama.cpp or Ollama server into the terminal,
//! and optionally back into the prompt file.

// Public modules
pub mod audit;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod markup;
pub mod render;
pub mod rewrite;
pub mod session;
pub mod sse;
pub mod stop;
pub mod types;
pub mod utils;

mod observability;

// Re-exports
pub use audit::{AuditLog, JsonlAuditLog, record_best_effort};
pub use builder::{ChatTemplate, RequestInput, RequestOptions, build, render_prompt};
pub use client::{EventStream, HttpProvider, Provider, base_url_from_env};
pub use config::{Action, Args, Config, OutputFormat, PromptSource};
pub use error::{Error, Result};
pub use markup::{MarkupOptions, parse};
pub use observability::register_biometrics;
pub use render::{PlainTextRenderer, Renderer, TeeFile};
pub use rewrite::RewriteTemplate;
pub use session::{Interrupt, Session, SessionConfig, SessionOutcome};
pub use stop::{ReasoningFilter, StopFilter};
pub use types::*;
