// Public modules
pub mod backend;
pub mod model_info;
pub mod request;
pub mod session_result;
pub mod stream_event;
pub mod turn;

// Re-exports
pub use backend::{Backend, Dialect, Mode};
pub use model_info::ModelInfo;
pub use request::{ChatRequest, CompletionRequest, GenerationOptions, Request};
pub use session_result::{AuditRecord, SessionResult};
pub use stream_event::StreamEvent;
pub use turn::{Role, Turn};
